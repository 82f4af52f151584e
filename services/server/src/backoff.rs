//! Retry backoff policy.
//!
//! An infinite sequence of delays: the raw value starts at 1 second and
//! doubles until it reaches 256 (about 4.3 minutes), where it holds. Each
//! yielded delay is jittered by a uniform offset in [-0.5, +0.5) so many
//! retrying devices/tasks do not wake in lockstep.

use rand::Rng;
use std::time::Duration;

#[derive(Debug)]
pub struct Backoff {
    value: u64,
}

impl Backoff {
    pub fn new() -> Self {
        Self { value: 1 }
    }

    /// The unjittered delay sequence: 1, 2, 4, ..., 256, 256, ...
    fn next_raw(&mut self) -> u64 {
        let value = self.value;
        if self.value < 256 {
            self.value *= 2;
        }
        value
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let raw = self.next_raw() as f64;
        let jitter = rand::thread_rng().gen_range(-0.5..0.5);
        Some(Duration::from_secs_f64(raw + jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_sequence_doubles_then_caps() {
        let mut backoff = Backoff::new();
        let raw: Vec<u64> = (0..10).map(|_| backoff.next_raw()).collect();
        assert_eq!(raw, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 256]);
    }

    #[test]
    fn jitter_stays_within_half_a_second() {
        let mut backoff = Backoff::new();
        let expected = [1, 2, 4, 8, 16, 32, 64, 128, 256, 256];
        for raw in expected {
            let delay = backoff.next().unwrap().as_secs_f64();
            assert!((delay - raw as f64).abs() <= 0.5, "raw {raw}, got {delay}");
        }
    }

    #[test]
    fn fresh_instance_restarts_at_one() {
        let mut first = Backoff::new();
        for _ in 0..6 {
            first.next();
        }
        let mut second = Backoff::new();
        assert!(second.next().unwrap() < Duration::from_secs(2));
    }
}
