//! Ingestion dispatcher: validate and route inbound device messages.
//!
//! Subscribes to the three telemetry wildcards, extracts the sensor
//! identifier from the topic, validates the batch strictly, and persists
//! it. Nothing here propagates back to devices: publishing is
//! fire-and-forget from their side, so malformed or foreign-keyed batches
//! are logged and dropped.

use rumqttc::{AsyncClient, Event, EventLoop, Packet, Publish, QoS};
use sn_protocol::{topic, ValidationError};
use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::repo::{self, RepoError};

// ---------------------------------------------------------------------------
// Subscription table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Logs,
    Measurements,
    Acknowledgments,
}

/// Wildcard patterns and their handlers, in subscription and matching
/// order. At most one pattern can match any telemetry topic (the fixed
/// prefixes differ), but evaluation is first-match-wins regardless.
pub const SUBSCRIPTIONS: [(&str, MessageKind); 3] = [
    (topic::LOGS_WILDCARD, MessageKind::Logs),
    (topic::MEASUREMENTS_WILDCARD, MessageKind::Measurements),
    (topic::ACKNOWLEDGMENTS_WILDCARD, MessageKind::Acknowledgments),
];

/// Select the handler for a concrete topic. First match wins.
pub fn select_kind(topic: &str) -> Option<MessageKind> {
    SUBSCRIPTIONS
        .iter()
        .find(|(pattern, _)| topic::matches(topic, pattern))
        .map(|&(_, kind)| kind)
}

// ---------------------------------------------------------------------------
// Supervision loop
// ---------------------------------------------------------------------------

/// Listen to and handle incoming messages from sensors. Never returns: on
/// transport failure it backs off, lets the event loop re-establish the
/// session, and re-issues all subscriptions on the next CONNACK.
pub async fn run(client: AsyncClient, mut eventloop: EventLoop, pool: PgPool) {
    let mut backoff = Backoff::new();
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("connected to MQTT broker");
                backoff = Backoff::new();
                for (pattern, _) in SUBSCRIPTIONS {
                    match client.subscribe(pattern, QoS::AtLeastOnce).await {
                        Ok(()) => info!(pattern, "subscribed"),
                        Err(e) => error!(pattern, error = %e, "failed to subscribe"),
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                handle_publish(&publish, &pool).await;
            }
            Ok(_) => {}
            Err(e) => {
                // Top-level supervision: the next poll reconnects.
                let delay = backoff.next().unwrap_or_default();
                error!(error = %e, delay_secs = delay.as_secs_f64(), "connection lost, reconnecting");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn handle_publish(publish: &Publish, pool: &PgPool) {
    debug!(topic = %publish.topic, bytes = publish.payload.len(), "received message");
    dispatch(&publish.topic, &publish.payload, pool).await;
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Validate and persist one inbound message. Validation rejects the whole
/// batch; there is no partial acceptance.
pub async fn dispatch(topic: &str, payload: &[u8], pool: &PgPool) {
    let Some(sensor_id) = topic::sensor_identifier(topic) else {
        warn!(topic, "failed to extract sensor identifier");
        return;
    };
    let Some(kind) = select_kind(topic) else {
        warn!(topic, "failed to match topic");
        return;
    };

    let outcome = match kind {
        MessageKind::Logs => handle_logs(sensor_id, payload, pool).await,
        MessageKind::Measurements => handle_measurements(sensor_id, payload, pool).await,
        MessageKind::Acknowledgments => handle_acknowledgments(sensor_id, payload, pool).await,
    };
    match outcome {
        Ok(()) => {}
        // Errors are logged and ignored as we can't give feedback.
        Err(DispatchError::Validation(e)) => {
            warn!(sensor_id, error = %e, "malformed message, dropping batch");
        }
        Err(DispatchError::Repo(RepoError::ForeignKey)) => {
            warn!(sensor_id, "sensor not found, dropping batch");
        }
        Err(DispatchError::Repo(e)) => {
            error!(sensor_id, error = %e, "failed to persist batch");
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

async fn handle_logs(sensor_id: &str, payload: &[u8], pool: &PgPool) -> Result<(), DispatchError> {
    let batch = sn_protocol::decode_logs(payload)?;
    repo::telemetry::create_logs(pool, sensor_id, &batch).await?;
    Ok(())
}

async fn handle_measurements(
    sensor_id: &str,
    payload: &[u8],
    pool: &PgPool,
) -> Result<(), DispatchError> {
    let batch = sn_protocol::decode_measurements(payload)?;
    repo::telemetry::create_measurements(pool, sensor_id, &batch).await?;
    Ok(())
}

async fn handle_acknowledgments(
    sensor_id: &str,
    payload: &[u8],
    pool: &PgPool,
) -> Result<(), DispatchError> {
    let batch = sn_protocol::decode_acknowledgments(payload)?;
    // One UPDATE per element; rows that don't exist are skipped silently
    // (an acknowledgment racing ahead of configuration creation is normal).
    for element in &batch {
        repo::configurations::update_on_acknowledgment(pool, sensor_id, element).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_covers_all_telemetry_topics() {
        assert_eq!(select_kind("logs/s1"), Some(MessageKind::Logs));
        assert_eq!(
            select_kind("measurements/s1"),
            Some(MessageKind::Measurements)
        );
        assert_eq!(
            select_kind("acknowledgments/s1"),
            Some(MessageKind::Acknowledgments)
        );
    }

    #[test]
    fn unknown_topics_do_not_route() {
        assert_eq!(select_kind("configurations/s1"), None);
        assert_eq!(select_kind("logs/s1/extra"), None);
        assert_eq!(select_kind("other/s1"), None);
    }

    #[test]
    fn subscription_order_is_fixed() {
        let patterns: Vec<&str> = SUBSCRIPTIONS.iter().map(|&(p, _)| p).collect();
        assert_eq!(patterns, vec!["logs/+", "measurements/+", "acknowledgments/+"]);
    }
}
