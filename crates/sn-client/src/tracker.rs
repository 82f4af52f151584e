//! Publish-confirmation tracking.
//!
//! The broker assigns wire packet ids only when the network loop actually
//! writes a publish, so the tracker hands out its own handle ids at
//! publish-call time and binds them to packet ids as `Outgoing::Publish`
//! events arrive, in submission order. A handle is outstanding from
//! registration until the matching PUBACK: **id present in the outstanding
//! set means unconfirmed**.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::ClientError;

/// Poll interval for the blocking wait operations.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct TrackerState {
    next_handle: u64,
    /// Handles registered but not yet bound to a wire packet id, in
    /// submission order.
    unassigned: VecDeque<u64>,
    /// Wire packet id -> handle, for in-flight publishes.
    by_packet_id: HashMap<u16, u64>,
    /// Handles not yet confirmed by the broker.
    outstanding: HashSet<u64>,
}

/// Thread-safe record of in-flight outbound messages.
///
/// Shared between the foreground publish path and the background network
/// thread; every method takes the lock briefly and performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct PublishTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl PublishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new in-flight message and return its handle.
    pub fn register(&self) -> u64 {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        state.unassigned.push_back(handle);
        state.outstanding.insert(handle);
        handle
    }

    /// Drop a handle whose publish never reached the network loop.
    pub fn abandon(&self, handle: u64) {
        let mut state = self.lock();
        state.unassigned.retain(|&h| h != handle);
        state.outstanding.remove(&handle);
    }

    /// Bind the oldest unassigned handle to a wire packet id.
    ///
    /// Retransmissions after a reconnect reuse packet ids that are already
    /// bound; those are ignored rather than consuming another handle.
    pub fn assign_packet_id(&self, packet_id: u16) {
        let mut state = self.lock();
        if state.by_packet_id.contains_key(&packet_id) {
            return;
        }
        match state.unassigned.pop_front() {
            Some(handle) => {
                state.by_packet_id.insert(packet_id, handle);
            }
            None => warn!(packet_id, "outgoing publish without a registered handle"),
        }
    }

    /// Resolve a confirmation. Returns the confirmed handle, if any.
    ///
    /// A confirmation for an unknown packet id is a defect worth logging,
    /// but must never crash the client: double confirmation is possible
    /// under at-least-once delivery.
    pub fn confirm(&self, packet_id: u16) -> Option<u64> {
        let mut state = self.lock();
        match state.by_packet_id.remove(&packet_id) {
            Some(handle) => {
                if !state.outstanding.remove(&handle) {
                    warn!(handle, "confirmation for a handle that was not outstanding");
                }
                Some(handle)
            }
            None => {
                warn!(packet_id, "confirmation for an unknown packet id");
                None
            }
        }
    }

    /// True iff the handle is no longer outstanding.
    pub fn is_confirmed(&self, handle: u64) -> bool {
        !self.lock().outstanding.contains(&handle)
    }

    /// Number of messages published but not yet confirmed.
    pub fn active_count(&self) -> usize {
        self.lock().outstanding.len()
    }

    /// Block until every registered message is confirmed.
    ///
    /// A plain 100 ms poll: the confirmation callback fires on the network
    /// thread, and polling avoids cross-thread wake-up plumbing for a wait
    /// that is rarely on a hot path.
    pub fn wait_for_all(&self, timeout: Duration) -> Result<(), ClientError> {
        let started = Instant::now();
        loop {
            if self.active_count() == 0 {
                return Ok(());
            }
            if started.elapsed() > timeout {
                return Err(ClientError::Timeout(
                    "timed out while waiting for messages to be published".to_owned(),
                ));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        // A poisoned tracker mutex means a panic mid-update on another
        // thread; the sets are still usable, so keep going.
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_present_means_unconfirmed() {
        let tracker = PublishTracker::new();
        let handle = tracker.register();
        assert!(!tracker.is_confirmed(handle));
        assert_eq!(tracker.active_count(), 1);

        tracker.assign_packet_id(1);
        tracker.confirm(1);
        assert!(tracker.is_confirmed(handle));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn confirmations_resolve_by_packet_id_not_order() {
        let tracker = PublishTracker::new();
        let first = tracker.register();
        let second = tracker.register();
        tracker.assign_packet_id(1);
        tracker.assign_packet_id(2);

        // Broker acks the second publish first.
        tracker.confirm(2);
        assert!(!tracker.is_confirmed(first));
        assert!(tracker.is_confirmed(second));
        tracker.confirm(1);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn retransmitted_packet_id_does_not_consume_a_handle() {
        let tracker = PublishTracker::new();
        tracker.register();
        tracker.register();
        tracker.assign_packet_id(1);
        tracker.assign_packet_id(1); // retransmission
        tracker.assign_packet_id(2);
        tracker.confirm(1);
        tracker.confirm(2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn double_confirmation_is_harmless() {
        let tracker = PublishTracker::new();
        let handle = tracker.register();
        tracker.assign_packet_id(1);
        assert_eq!(tracker.confirm(1), Some(handle));
        assert_eq!(tracker.confirm(1), None);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn abandon_removes_handle() {
        let tracker = PublishTracker::new();
        let handle = tracker.register();
        tracker.abandon(handle);
        assert!(tracker.is_confirmed(handle));
        assert_eq!(tracker.active_count(), 0);
        // The next assignment must not pick up the abandoned handle.
        let live = tracker.register();
        tracker.assign_packet_id(1);
        tracker.confirm(1);
        assert!(tracker.is_confirmed(live));
    }

    #[test]
    fn wait_for_all_returns_once_everything_confirms() {
        let tracker = PublishTracker::new();
        for _ in 0..5 {
            tracker.register();
        }
        for packet_id in 1..=5 {
            tracker.assign_packet_id(packet_id);
        }

        let background = tracker.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            for packet_id in 1..=5 {
                background.confirm(packet_id);
            }
        });

        tracker.wait_for_all(Duration::from_secs(5)).unwrap();
        assert_eq!(tracker.active_count(), 0);
        worker.join().unwrap();
    }

    #[test]
    fn wait_for_all_times_out_within_poll_granularity() {
        let tracker = PublishTracker::new();
        tracker.register();

        let timeout = Duration::from_millis(300);
        let started = Instant::now();
        let result = tracker.wait_for_all(timeout);
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + POLL_INTERVAL + Duration::from_millis(100));
    }

    #[test]
    fn wait_for_all_with_nothing_outstanding_is_immediate() {
        let tracker = PublishTracker::new();
        tracker.wait_for_all(Duration::ZERO).unwrap();
    }
}
