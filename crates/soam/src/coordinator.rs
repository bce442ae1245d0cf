// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Trigger coordinators - state-gated action workers.
//!
//! Two variants of the same pattern, each running on the single
//! coordinator worker thread a sample owns:
//!
//! - [`SubscribeCoordinator`]: blocks until a tracked endpoint becomes
//!   available, then issues `request_event` + `subscribe` for it exactly
//!   once per consumption, processing all eligible keys in ascending
//!   order per wake.
//! - [`CyclicRequester`]: unconditional periodic loop that sends one
//!   request per interval while the tracked endpoint is available.
//!
//! Both are level-triggered consumers of the availability tracker: a
//! worker never assumes it saw every transition, only the state at wake
//! time.

use crate::availability::{AvailabilityTracker, WaitOutcome};
use crate::correlator::build_request;
use crate::lifecycle::ShutdownToken;
use crate::provider::Provider;
use crate::types::{EventId, EventgroupId, MethodId, Payload, ServiceKey};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Policy for a consumed key whose endpoint flaps unavailable and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResubscribePolicy {
    /// A consumed key never re-triggers; matches the observed samples.
    #[default]
    Once,
    /// Consumption clears when the key is observed unavailable, so a
    /// later availability triggers request_event + subscribe again.
    OnReturn,
}

/// What to subscribe once an endpoint becomes available.
#[derive(Debug, Clone)]
pub struct SubscribePlan {
    /// Event to request before subscribing.
    pub event: EventId,
    /// Event groups to request the event under and then join.
    pub eventgroups: BTreeSet<EventgroupId>,
}

/// One-shot-per-key subscription coordinator.
///
/// Tracks a fixed key set. On every wake it walks all tracked keys in
/// ascending order and, for each key that is available and not yet
/// consumed, performs the gated call pair and marks the key consumed.
pub struct SubscribeCoordinator {
    provider: Arc<dyn Provider>,
    tracker: Arc<AvailabilityTracker>,
    keys: Vec<ServiceKey>,
    plan: SubscribePlan,
    policy: ResubscribePolicy,
}

impl SubscribeCoordinator {
    /// Create a coordinator for the given keys.
    ///
    /// Keys are sorted ascending and deduplicated.
    pub fn new(
        provider: Arc<dyn Provider>,
        tracker: Arc<AvailabilityTracker>,
        keys: impl IntoIterator<Item = ServiceKey>,
        plan: SubscribePlan,
        policy: ResubscribePolicy,
    ) -> Self {
        let mut keys: Vec<ServiceKey> = keys.into_iter().collect();
        keys.sort_unstable();
        keys.dedup();
        Self {
            provider,
            tracker,
            keys,
            plan,
            policy,
        }
    }

    /// The tracked keys, ascending.
    #[must_use]
    pub fn keys(&self) -> &[ServiceKey] {
        &self.keys
    }

    /// Worker loop. Runs until the tracker reports shutdown.
    pub fn run(self) {
        let mut consumed: HashSet<ServiceKey> = HashSet::new();

        loop {
            let policy = self.policy;
            let keys = &self.keys;
            let outcome = self.tracker.wait_until(|map| {
                keys.iter().any(|key| {
                    let available = map.get(key).copied().unwrap_or(false);
                    match policy {
                        ResubscribePolicy::Once => available && !consumed.contains(key),
                        // Also wake on drops so consumption can be cleared.
                        ResubscribePolicy::OnReturn => available != consumed.contains(key),
                    }
                })
            });

            let snapshot = match outcome {
                WaitOutcome::ShutdownRequested => {
                    log::debug!("[coordinator] shutdown observed, exiting");
                    return;
                }
                WaitOutcome::Satisfied(snapshot) => snapshot,
            };

            for key in &self.keys {
                let available = snapshot.get(key).copied().unwrap_or(false);
                if available {
                    if consumed.insert(*key) {
                        log::info!(
                            "[coordinator] {key} available, requesting event {:04x} and subscribing",
                            self.plan.event
                        );
                        self.provider.request_event(
                            key.service,
                            key.instance,
                            self.plan.event,
                            &self.plan.eventgroups,
                        );
                        for group in &self.plan.eventgroups {
                            self.provider.subscribe(key.service, key.instance, *group);
                        }
                    }
                } else if self.policy == ResubscribePolicy::OnReturn && consumed.remove(key) {
                    log::debug!("[coordinator] {key} dropped, re-armed");
                }
            }
        }
    }
}

/// Cyclic request sender.
///
/// Loops from thread start: each cycle it sends one request if the
/// target endpoint is currently available, logs either way, then sleeps
/// the configured interval on the shutdown token so a stop request
/// interrupts the sleep instead of waiting it out. The loop never
/// blocks indefinitely; while the target is unavailable it keeps
/// cycling as a logged no-op.
pub struct CyclicRequester {
    provider: Arc<dyn Provider>,
    tracker: Arc<AvailabilityTracker>,
    token: ShutdownToken,
    target: ServiceKey,
    method: MethodId,
    reliable: bool,
    cycle: Duration,
    payload: Payload,
}

impl CyclicRequester {
    /// Create a cyclic requester for one target method.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn Provider>,
        tracker: Arc<AvailabilityTracker>,
        token: ShutdownToken,
        target: ServiceKey,
        method: MethodId,
        reliable: bool,
        cycle: Duration,
        payload: Payload,
    ) -> Self {
        Self {
            provider,
            tracker,
            token,
            target,
            method,
            reliable,
            cycle,
            payload,
        }
    }

    /// Worker loop. Runs until the shutdown token triggers.
    pub fn run(self) {
        let mut request = build_request(
            self.provider.as_ref(),
            self.target,
            self.method,
            self.reliable,
            self.payload,
        );

        loop {
            if self.token.is_triggered() {
                break;
            }

            if self.tracker.is_available(self.target) {
                self.provider.send(&mut request);
                log::info!(
                    "[cyclic] Client/Session [{:04x}/{:04x}] sent a request to Service {}",
                    request.client,
                    request.session,
                    self.target
                );
            } else {
                log::info!("[cyclic] Service {} not available, skipping send", self.target);
            }

            log::debug!("[cyclic] sleeping for {} ms", self.cycle.as_millis());
            if self.token.wait_timeout(self.cycle) {
                break;
            }
        }
        log::debug!("[cyclic] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackBus;

    fn plan() -> SubscribePlan {
        let mut groups = BTreeSet::new();
        groups.insert(0x0321);
        SubscribePlan {
            event: 0x0123,
            eventgroups: groups,
        }
    }

    #[test]
    fn keys_are_sorted_and_deduplicated() {
        let bus = LoopbackBus::new();
        let provider = bus.attach("test");
        let tracker = Arc::new(AvailabilityTracker::new());
        let k1 = ServiceKey::new(0x1234, 0x5678);
        let k2 = ServiceKey::new(0x1234, 0x6789);

        let coordinator = SubscribeCoordinator::new(
            provider,
            tracker,
            [k2, k1, k2],
            plan(),
            ResubscribePolicy::Once,
        );
        assert_eq!(coordinator.keys(), &[k1, k2]);
    }

    #[test]
    fn default_policy_is_once() {
        assert_eq!(ResubscribePolicy::default(), ResubscribePolicy::Once);
    }
}
