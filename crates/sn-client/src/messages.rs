//! Outbound message builders.
//!
//! Timestamps and (for logs/measurements) revisions are optional here; the
//! client stamps missing timestamps with the current time and missing
//! revisions with its current configuration revision at publish time.

use sn_protocol::{
    Acknowledgment, Log, MAX_LOG_MESSAGE_LENGTH, Measurement, Revision, Severity,
};
use std::collections::BTreeMap;

/// A log entry to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub severity: Severity,
    pub message: String,
    pub revision: Option<Revision>,
    pub timestamp: Option<f64>,
}

impl LogMessage {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            revision: None,
            timestamp: None,
        }
    }

    pub(crate) fn into_envelope(self, default_revision: Option<Revision>, now: f64) -> Log {
        let mut message = self.message;
        // Oversized messages are trimmed rather than rejected; the service
        // would drop the whole batch otherwise.
        if message.len() > MAX_LOG_MESSAGE_LENGTH {
            let mut end = MAX_LOG_MESSAGE_LENGTH;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Log {
            revision: self.revision.or(default_revision),
            severity: self.severity,
            message,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// A measurement to publish, e.g. `{"temperature": 20.0, "humidity": 45.4}`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementMessage {
    pub value: BTreeMap<String, f64>,
    pub revision: Option<Revision>,
    pub timestamp: Option<f64>,
}

impl MeasurementMessage {
    pub fn new<K, I>(value: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, f64)>,
    {
        Self {
            value: value.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            revision: None,
            timestamp: None,
        }
    }

    pub(crate) fn into_envelope(
        self,
        default_revision: Option<Revision>,
        now: f64,
    ) -> Measurement {
        Measurement {
            revision: self.revision.or(default_revision),
            value: self.value,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

/// A configuration acknowledgment to publish. The revision is required:
/// devices always report exactly which revision they processed.
#[derive(Debug, Clone, PartialEq)]
pub struct AcknowledgmentMessage {
    pub revision: Revision,
    pub success: bool,
    pub timestamp: Option<f64>,
}

impl AcknowledgmentMessage {
    pub fn new(revision: Revision, success: bool) -> Self {
        Self {
            revision,
            success,
            timestamp: None,
        }
    }

    pub(crate) fn into_envelope(self, now: f64) -> Acknowledgment {
        Acknowledgment {
            revision: self.revision,
            success: self.success,
            timestamp: self.timestamp.unwrap_or(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_timestamp_is_stamped_with_now() {
        let envelope = LogMessage::new(Severity::Info, "m").into_envelope(None, 100.5);
        assert_eq!(envelope.timestamp, 100.5);

        let mut message = LogMessage::new(Severity::Info, "m");
        message.timestamp = Some(7.0);
        assert_eq!(message.into_envelope(None, 100.5).timestamp, 7.0);
    }

    #[test]
    fn missing_revision_defaults_to_current() {
        let envelope = MeasurementMessage::new([("t", 20.0)]).into_envelope(Some(4), 0.0);
        assert_eq!(envelope.revision, Some(4));

        let mut message = MeasurementMessage::new([("t", 20.0)]);
        message.revision = Some(9);
        assert_eq!(message.into_envelope(Some(4), 0.0).revision, Some(9));

        let envelope = MeasurementMessage::new([("t", 20.0)]).into_envelope(None, 0.0);
        assert_eq!(envelope.revision, None);
    }

    #[test]
    fn oversized_log_message_is_trimmed_on_a_char_boundary() {
        let long = "ä".repeat(MAX_LOG_MESSAGE_LENGTH); // 2 bytes per char
        let envelope = LogMessage::new(Severity::Error, long).into_envelope(None, 0.0);
        assert!(envelope.message.len() <= MAX_LOG_MESSAGE_LENGTH);
        assert!(envelope.message.chars().all(|c| c == 'ä'));
    }

    #[test]
    fn acknowledgment_keeps_required_revision() {
        let envelope = AcknowledgmentMessage::new(3, true).into_envelope(50.0);
        assert_eq!(envelope.revision, 3);
        assert!(envelope.success);
        assert_eq!(envelope.timestamp, 50.0);
    }
}
