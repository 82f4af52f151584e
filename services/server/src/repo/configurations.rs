use sn_protocol::{Acknowledgment, Revision};
use sqlx::PgPool;

use super::RepoError;

/// Record that a configuration revision was published to its sensor.
/// Called only after the broker accepted the retained publish.
pub async fn update_on_publication(
    pool: &PgPool,
    sensor_identifier: &str,
    revision: Revision,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"UPDATE configurations
           SET publication_timestamp = now()
           WHERE sensor_identifier = $1 AND revision = $2"#,
    )
    .bind(sensor_identifier)
    .bind(revision as i32)
    .execute(pool)
    .await?;
    Ok(())
}

/// Record a device's acknowledgment against its configuration row.
///
/// An UPDATE that matches no row (unknown sensor, or an acknowledgment that
/// raced ahead of configuration creation) is skipped silently. A late
/// acknowledgment for an older revision updates that older row only; newer
/// rows are untouched.
pub async fn update_on_acknowledgment(
    pool: &PgPool,
    sensor_identifier: &str,
    element: &Acknowledgment,
) -> Result<(), RepoError> {
    sqlx::query(
        r#"UPDATE configurations
           SET acknowledgment_timestamp = to_timestamp($3), success = $4
           WHERE sensor_identifier = $1 AND revision = $2"#,
    )
    .bind(sensor_identifier)
    .bind(element.revision as i32)
    .bind(element.timestamp)
    .bind(element.success)
    .execute(pool)
    .await?;
    Ok(())
}
