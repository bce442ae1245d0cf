// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Availability tracker - per-endpoint availability under one lock.
//!
//! Availability callbacks write the map through [`AvailabilityTracker::set_available`];
//! the trigger coordinator blocks in [`AvailabilityTracker::wait_until`]
//! on the paired condition variable. The condition is level-triggered:
//! a waiter woken after a rapid off/on flap observes only the final
//! state, never the intermediate transitions.

use crate::types::ServiceKey;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;

/// Result of a predicate wait on the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate held; carries the map state observed under the lock.
    Satisfied(BTreeMap<ServiceKey, bool>),
    /// Shutdown was requested; the waiter must exit its loop.
    ShutdownRequested,
}

struct TrackerState {
    available: BTreeMap<ServiceKey, bool>,
    shutdown: bool,
}

/// Thread-safe map from [`ServiceKey`] to current availability.
///
/// Mutated only from the availability callback; read by the coordinator
/// under the same lock via the wait predicate. Unknown keys default to
/// unavailable.
pub struct AvailabilityTracker {
    state: Mutex<TrackerState>,
    wake: Condvar,
}

impl AvailabilityTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                available: BTreeMap::new(),
                shutdown: false,
            }),
            wake: Condvar::new(),
        }
    }

    /// Record an availability change and wake one waiting coordinator.
    ///
    /// The map mutation happens-before the wake; a woken waiter always
    /// re-checks its predicate under the lock.
    pub fn set_available(&self, key: ServiceKey, available: bool) {
        {
            let mut state = self.state.lock();
            state.available.insert(key, available);
        }
        self.wake.notify_one();
    }

    /// Apply several availability changes in one lock-held update.
    ///
    /// A waiter woken afterwards observes all of them in a single pass.
    pub fn set_batch(&self, updates: &[(ServiceKey, bool)]) {
        {
            let mut state = self.state.lock();
            for (key, available) in updates {
                state.available.insert(*key, *available);
            }
        }
        self.wake.notify_one();
    }

    /// Current availability of one endpoint; unknown keys are unavailable.
    #[must_use]
    pub fn is_available(&self, key: ServiceKey) -> bool {
        self.state.lock().available.get(&key).copied().unwrap_or(false)
    }

    /// Copy of the current availability map.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<ServiceKey, bool> {
        self.state.lock().available.clone()
    }

    /// Block until `predicate` holds over the map, or shutdown is requested.
    ///
    /// The predicate is evaluated under the lock and re-evaluated after
    /// every wake, so spurious and coalesced wakes are harmless.
    pub fn wait_until<F>(&self, mut predicate: F) -> WaitOutcome
    where
        F: FnMut(&BTreeMap<ServiceKey, bool>) -> bool,
    {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return WaitOutcome::ShutdownRequested;
            }
            if predicate(&state.available) {
                return WaitOutcome::Satisfied(state.available.clone());
            }
            self.wake.wait(&mut state);
        }
    }

    /// Request shutdown and wake every waiter unconditionally, whether or
    /// not any predicate holds.
    pub fn request_shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.shutdown = true;
        }
        self.wake.notify_all();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }
}

impl Default for AvailabilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const KEY: ServiceKey = ServiceKey::new(0x1234, 0x5678);

    #[test]
    fn unknown_keys_default_to_unavailable() {
        let tracker = AvailabilityTracker::new();
        assert!(!tracker.is_available(KEY));
    }

    #[test]
    fn set_available_is_observable() {
        let tracker = AvailabilityTracker::new();
        tracker.set_available(KEY, true);
        assert!(tracker.is_available(KEY));
        tracker.set_available(KEY, false);
        assert!(!tracker.is_available(KEY));
    }

    #[test]
    fn wait_returns_immediately_when_predicate_already_holds() {
        let tracker = AvailabilityTracker::new();
        tracker.set_available(KEY, true);
        let outcome = tracker.wait_until(|map| map.get(&KEY).copied().unwrap_or(false));
        match outcome {
            WaitOutcome::Satisfied(map) => assert_eq!(map.get(&KEY), Some(&true)),
            WaitOutcome::ShutdownRequested => panic!("unexpected shutdown"),
        }
    }

    #[test]
    fn wait_wakes_on_cross_thread_update() {
        let tracker = Arc::new(AvailabilityTracker::new());
        let writer = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            writer.set_available(KEY, true);
        });

        let outcome = tracker.wait_until(|map| map.get(&KEY).copied().unwrap_or(false));
        assert!(matches!(outcome, WaitOutcome::Satisfied(_)));
        handle.join().expect("writer thread panicked");
    }

    #[test]
    fn shutdown_wakes_waiter_with_false_predicate() {
        let tracker = Arc::new(AvailabilityTracker::new());
        let stopper = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.request_shutdown();
        });

        let outcome = tracker.wait_until(|_| false);
        assert_eq!(outcome, WaitOutcome::ShutdownRequested);
        handle.join().expect("stopper thread panicked");
    }

    #[test]
    fn batch_update_is_visible_as_a_whole() {
        let tracker = AvailabilityTracker::new();
        let k1 = ServiceKey::new(0x1234, 0x5678);
        let k2 = ServiceKey::new(0x1234, 0x6789);
        tracker.set_batch(&[(k1, true), (k2, true)]);

        let outcome = tracker.wait_until(|map| {
            map.get(&k1).copied().unwrap_or(false) && map.get(&k2).copied().unwrap_or(false)
        });
        assert!(matches!(outcome, WaitOutcome::Satisfied(_)));
    }

    #[test]
    fn flap_between_write_and_wake_shows_final_state_only() {
        let tracker = AvailabilityTracker::new();
        tracker.set_available(KEY, true);
        tracker.set_available(KEY, false);
        tracker.set_available(KEY, true);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.get(&KEY), Some(&true));
        assert_eq!(snapshot.len(), 1);
    }
}
