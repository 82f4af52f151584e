// sn-protocol: wire types and validation for the sensor synchronization
// protocol.
//
// Every telemetry publish is a UTF-8 JSON array of envelopes of a single
// kind, never a bare object. Configuration messages are a bare JSON object
// retained on the broker. The decoders here are strict: unknown keys,
// missing required fields, and wrong literals reject the whole batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod topic;

// ---------------------------------------------------------------------------
// Scalar types
// ---------------------------------------------------------------------------

/// Configuration version number, monotonically non-decreasing per sensor.
///
/// Assigned only by the service; devices report the revision they applied.
pub type Revision = u32;

/// Upper bound (exclusive) so revisions always fit a Postgres INT4 column.
pub const MAX_REVISION: Revision = i32::MAX as Revision;

/// Maximum accepted length of a measurement attribute key.
pub const MAX_KEY_LENGTH: usize = 64;

/// Log messages longer than this are trimmed by the device client.
pub const MAX_LOG_MESSAGE_LENGTH: usize = 4096;

/// Log severity literal; anything else is rejected on ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes (device -> service)
// ---------------------------------------------------------------------------

/// A single log entry published by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Log {
    #[serde(default)]
    pub revision: Option<Revision>,
    pub severity: Severity,
    pub message: String,
    /// Unix seconds.
    pub timestamp: f64,
}

/// A single measurement published by a device.
///
/// One envelope carries a non-empty mapping from attribute key to numeric
/// value; the service fans it out into one row per attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Measurement {
    #[serde(default)]
    pub revision: Option<Revision>,
    pub value: BTreeMap<String, f64>,
    pub timestamp: f64,
}

/// A device's report that it processed a configuration revision.
///
/// Unlike logs and measurements, the revision is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Acknowledgment {
    pub revision: Revision,
    pub success: bool,
    pub timestamp: f64,
}

// ---------------------------------------------------------------------------
// Configuration (service -> device, retained)
// ---------------------------------------------------------------------------

/// Configuration message retained on `configurations/{sensor_id}`.
///
/// The configuration value itself is opaque to the protocol; devices accept
/// any JSON value and de-duplicate by revision number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub revision: Revision,
    pub configuration: serde_json::Value,
}

impl Configuration {
    pub fn encode(&self) -> Vec<u8> {
        // Serializing a revision + arbitrary JSON value cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Best-effort decode for the device side.
    ///
    /// Configuration messages are informational; anything that is not an
    /// object carrying an integer `revision` and a `configuration` field is
    /// discarded silently (`None`), never surfaced as an error.
    pub fn decode(payload: &[u8]) -> Option<Self> {
        serde_json::from_slice(payload).ok()
    }
}

// ---------------------------------------------------------------------------
// Batch validators (service-side ingestion)
// ---------------------------------------------------------------------------

/// Why an inbound batch was rejected.
///
/// Always recovered by dropping the whole batch and logging; there is no
/// feedback channel to the publishing device.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty batch")]
    EmptyBatch,
    #[error("empty measurement value mapping")]
    EmptyValue,
    #[error("invalid attribute key: {0:?}")]
    InvalidKey(String),
    #[error("revision {0} out of range")]
    RevisionRange(Revision),
}

/// Parse and validate a batched logs payload. Rejects the whole batch on
/// the first invalid element — no partial acceptance.
pub fn decode_logs(payload: &[u8]) -> Result<Vec<Log>, ValidationError> {
    let batch: Vec<Log> = serde_json::from_slice(payload)?;
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    for element in &batch {
        check_revision(element.revision)?;
    }
    Ok(batch)
}

/// Parse and validate a batched measurements payload.
pub fn decode_measurements(payload: &[u8]) -> Result<Vec<Measurement>, ValidationError> {
    let batch: Vec<Measurement> = serde_json::from_slice(payload)?;
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    for element in &batch {
        check_revision(element.revision)?;
        if element.value.is_empty() {
            return Err(ValidationError::EmptyValue);
        }
        for key in element.value.keys() {
            if !is_valid_key(key) {
                return Err(ValidationError::InvalidKey(key.clone()));
            }
        }
    }
    Ok(batch)
}

/// Parse and validate a batched acknowledgments payload.
pub fn decode_acknowledgments(payload: &[u8]) -> Result<Vec<Acknowledgment>, ValidationError> {
    let batch: Vec<Acknowledgment> = serde_json::from_slice(payload)?;
    if batch.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    for element in &batch {
        check_revision(Some(element.revision))?;
    }
    Ok(batch)
}

fn check_revision(revision: Option<Revision>) -> Result<(), ValidationError> {
    match revision {
        Some(r) if r >= MAX_REVISION => Err(ValidationError::RevisionRange(r)),
        _ => Ok(()),
    }
}

/// Attribute keys are lowercase alphanumeric runs separated by single
/// underscores, at most 64 characters: `temperature`, `rh_percent`.
pub fn is_valid_key(key: &str) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
        return false;
    }
    key.split('_').all(|part| {
        !part.is_empty()
            && part
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    })
}
