//! Topic construction and matching.
//!
//! Topics are `/`-delimited UTF-8 strings with the sensor identifier as the
//! final segment: `configurations/{sensor}`, `logs/{sensor}`,
//! `measurements/{sensor}`, `acknowledgments/{sensor}`. The service
//! subscribes with single-level wildcards (`logs/+` etc.).

/// Wildcard patterns the service subscribes to, in subscription order.
pub const LOGS_WILDCARD: &str = "logs/+";
pub const MEASUREMENTS_WILDCARD: &str = "measurements/+";
pub const ACKNOWLEDGMENTS_WILDCARD: &str = "acknowledgments/+";

pub fn configurations(sensor_id: &str) -> String {
    format!("configurations/{sensor_id}")
}

pub fn logs(sensor_id: &str) -> String {
    format!("logs/{sensor_id}")
}

pub fn measurements(sensor_id: &str) -> String {
    format!("measurements/{sensor_id}")
}

pub fn acknowledgments(sensor_id: &str) -> String {
    format!("acknowledgments/{sensor_id}")
}

/// The sensor identifier is the final topic segment.
pub fn sensor_identifier(topic: &str) -> Option<&str> {
    topic.rsplit('/').next().filter(|s| !s.is_empty())
}

/// Match a concrete topic against a subscription pattern where `+` matches
/// exactly one segment. Multi-level wildcards (`#`) are not used by this
/// protocol.
pub fn matches(topic: &str, pattern: &str) -> bool {
    let mut topic_segments = topic.split('/');
    let mut pattern_segments = pattern.split('/');
    loop {
        match (topic_segments.next(), pattern_segments.next()) {
            (None, None) => return true,
            (Some(t), Some(p)) => {
                if p != "+" && p != t {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction() {
        assert_eq!(configurations("s1"), "configurations/s1");
        assert_eq!(logs("s1"), "logs/s1");
        assert_eq!(measurements("s1"), "measurements/s1");
        assert_eq!(acknowledgments("s1"), "acknowledgments/s1");
    }

    #[test]
    fn sensor_identifier_is_final_segment() {
        assert_eq!(sensor_identifier("logs/abc"), Some("abc"));
        assert_eq!(sensor_identifier("abc"), Some("abc"));
        assert_eq!(sensor_identifier("logs/"), None);
    }

    #[test]
    fn wildcard_matching() {
        assert!(matches("logs/abc", LOGS_WILDCARD));
        assert!(matches("measurements/abc", MEASUREMENTS_WILDCARD));
        assert!(matches("acknowledgments/abc", ACKNOWLEDGMENTS_WILDCARD));
        assert!(!matches("logs/abc", MEASUREMENTS_WILDCARD));
        assert!(!matches("logs/abc/extra", LOGS_WILDCARD));
        assert!(!matches("logs", LOGS_WILDCARD));
        assert!(matches("logs/abc", "logs/abc"));
        assert!(!matches("logs/abc", "logs/def"));
    }
}
