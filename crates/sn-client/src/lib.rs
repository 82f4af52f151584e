//! Device-side client for the sensor synchronization protocol.
//!
//! The API is synchronous and blocking: edge callers are typically
//! single-threaded scripts that want a plain call/return interface. The MQTT network loop runs on a background thread; the
//! foreground thread publishes batches and polls for confirmation. The two
//! share the outstanding-handle set and the latest-configuration slot
//! through mutex-guarded state with short, I/O-free critical sections.
//!
//! ```no_run
//! use sn_client::{ClientConfig, DeviceClient, MeasurementMessage};
//! use std::time::Duration;
//!
//! let client = DeviceClient::connect(ClientConfig {
//!     host: "broker.example.com".to_owned(),
//!     port: 1883,
//!     identifier: "sensor-1".to_owned(),
//!     password: "secret".to_owned(),
//!     sensor_identifier: Some("sensor-1".to_owned()),
//!     ..ClientConfig::default()
//! })?;
//!
//! client.publish_measurements(vec![MeasurementMessage::new([("temperature", 20.0)])])?;
//! client.wait_for_all(Duration::from_secs(60))?;
//! # Ok::<(), sn_client::ClientError>(())
//! ```

mod client;
mod messages;
mod tracker;

pub use client::{ClientConfig, DeviceClient};
pub use messages::{AcknowledgmentMessage, LogMessage, MeasurementMessage};
pub use sn_protocol::{Configuration, Revision, Severity};
pub use tracker::PublishTracker;

/// Errors surfaced to the device-side caller.
///
/// Everything else (transport hiccups, undecodable configuration messages,
/// duplicate confirmations) is logged and recovered internally.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Broker refused the connection or the CONNACK never arrived.
    /// Fatal to client construction.
    #[error("connection: {0}")]
    Connection(String),
    /// A wait exceeded its timeout. The messages themselves are not
    /// retracted; only the caller stops waiting.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Invalid use of the client API.
    #[error("config: {0}")]
    Config(String),
    /// A batch must contain at least one message.
    #[error("empty batch")]
    EmptyBatch,
    /// The request could not be handed to the network loop.
    #[error("mqtt: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    /// A batch could not be serialized to the wire format.
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}
