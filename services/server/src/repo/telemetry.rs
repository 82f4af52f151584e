use sn_protocol::{Log, Measurement};
use sqlx::PgPool;

use super::RepoError;

/// Insert one row per log element.
pub async fn create_logs(
    pool: &PgPool,
    sensor_identifier: &str,
    batch: &[Log],
) -> Result<(), RepoError> {
    let mut severities: Vec<&str> = Vec::with_capacity(batch.len());
    let mut messages: Vec<&str> = Vec::with_capacity(batch.len());
    let mut revisions: Vec<Option<i32>> = Vec::with_capacity(batch.len());
    let mut timestamps: Vec<f64> = Vec::with_capacity(batch.len());
    for element in batch {
        severities.push(element.severity.as_str());
        messages.push(&element.message);
        revisions.push(element.revision.map(|r| r as i32));
        timestamps.push(element.timestamp);
    }

    sqlx::query(
        r#"INSERT INTO logs (sensor_identifier, severity, message, revision, creation_timestamp)
           SELECT $1, batch.severity, batch.message, batch.revision, to_timestamp(batch.creation_timestamp)
           FROM UNNEST($2::text[], $3::text[], $4::int4[], $5::float8[])
                AS batch (severity, message, revision, creation_timestamp)"#,
    )
    .bind(sensor_identifier)
    .bind(&severities)
    .bind(&messages)
    .bind(&revisions)
    .bind(&timestamps)
    .execute(pool)
    .await?;
    Ok(())
}

/// Insert one row per (measurement element, attribute) pair: a single
/// multi-attribute envelope fans out into one row per attribute key.
pub async fn create_measurements(
    pool: &PgPool,
    sensor_identifier: &str,
    batch: &[Measurement],
) -> Result<(), RepoError> {
    let rows = fan_out(batch);

    sqlx::query(
        r#"INSERT INTO measurements (sensor_identifier, attribute, value, revision, creation_timestamp)
           SELECT $1, batch.attribute, batch.value, batch.revision, to_timestamp(batch.creation_timestamp)
           FROM UNNEST($2::text[], $3::float8[], $4::int4[], $5::float8[])
                AS batch (attribute, value, revision, creation_timestamp)"#,
    )
    .bind(sensor_identifier)
    .bind(&rows.attributes)
    .bind(&rows.values)
    .bind(&rows.revisions)
    .bind(&rows.timestamps)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Default)]
struct MeasurementRows<'a> {
    attributes: Vec<&'a str>,
    values: Vec<f64>,
    revisions: Vec<Option<i32>>,
    timestamps: Vec<f64>,
}

fn fan_out(batch: &[Measurement]) -> MeasurementRows<'_> {
    let mut rows = MeasurementRows::default();
    for element in batch {
        for (attribute, value) in &element.value {
            rows.attributes.push(attribute);
            rows.values.push(*value);
            rows.revisions.push(element.revision.map(|r| r as i32));
            rows.timestamps.push(element.timestamp);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn fan_out_one_row_per_attribute() {
        let batch = vec![
            Measurement {
                revision: Some(2),
                value: BTreeMap::from([("rh".to_owned(), 45.4), ("t".to_owned(), 20.0)]),
                timestamp: 100.0,
            },
            Measurement {
                revision: None,
                value: BTreeMap::from([("t".to_owned(), 20.5)]),
                timestamp: 101.0,
            },
        ];
        let rows = fan_out(&batch);
        assert_eq!(rows.attributes, vec!["rh", "t", "t"]);
        assert_eq!(rows.values, vec![45.4, 20.0, 20.5]);
        assert_eq!(rows.revisions, vec![Some(2), Some(2), None]);
        assert_eq!(rows.timestamps, vec![100.0, 100.0, 101.0]);
    }
}
