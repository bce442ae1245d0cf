// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capability provider abstraction.
//!
//! The middleware runtime (wire encoding, service discovery, transport)
//! lives outside this crate. Everything the coordination core needs from
//! it is expressed as the [`Provider`] trait: offer/request services,
//! publish/subscribe events, send messages, and register the three
//! callback kinds (state, availability, message).
//!
//! # Thread Safety
//!
//! Callbacks are invoked from provider-owned threads. Implementations and
//! handlers must be `Send + Sync`; handlers should never assume they run
//! on the thread that registered them and should return quickly.

use crate::types::{
    EventId, EventgroupId, InstanceId, Message, MethodId, Payload, ServiceId,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Local registration state with the middleware routing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    /// The application is registered and may offer/request services.
    Registered,
    /// The application lost its registration.
    Deregistered,
}

/// Callback invoked when the local registration state changes.
pub type StateHandler = Arc<dyn Fn(RegistrationState) + Send + Sync>;

/// Callback invoked when remote endpoint availability changes.
///
/// Multiple registrations for different keys may share one callback.
pub type AvailabilityHandler = Arc<dyn Fn(ServiceId, InstanceId, bool) + Send + Sync>;

/// Callback invoked for a matching inbound message.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Kind of an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    /// Plain event, delivered only when notified.
    #[default]
    Event,
    /// Field event with a current value delivered on subscription.
    Field,
}

/// Transport reliability requested for an offered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReliabilityKind {
    /// Delivered over the reliable transport.
    #[default]
    Reliable,
    /// Delivered best-effort.
    Unreliable,
}

/// Configuration of an offered event.
#[derive(Debug, Clone)]
pub struct EventConfig {
    /// Event or field semantics.
    pub kind: EventKind,
    /// Cyclic re-notification interval; zero disables cyclic updates.
    pub cycle: Duration,
    /// Whether a change notification restarts the cycle timer.
    pub change_resets_cycle: bool,
    /// Whether to notify only on value changes.
    pub update_on_change: bool,
    /// Requested transport reliability.
    pub reliability: ReliabilityKind,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            kind: EventKind::Event,
            cycle: Duration::ZERO,
            change_resets_cycle: false,
            update_on_change: true,
            reliability: ReliabilityKind::Reliable,
        }
    }
}

/// Handle to the external middleware runtime.
///
/// `init` must be called before any other operation; `start` blocks
/// running the provider's event loop on the calling thread; `stop` is
/// idempotent and safe to call from any thread, including provider
/// callback threads. Stop is sticky: a `stop` that precedes `start`
/// makes `start` return without entering the loop, so no interleaving
/// of the two can block forever.
///
/// Steady-state operations (offer, subscribe, notify, send) are
/// fire-and-forget: mid-run failures are the provider's to handle.
pub trait Provider: Send + Sync {
    /// Initialize the provider. Must precede every other call.
    fn init(&self) -> crate::Result<()>;

    /// Run the provider's event loop, blocking until [`Provider::stop`].
    ///
    /// Returns immediately when `stop` has already been called.
    fn start(&self);

    /// Stop the event loop. Idempotent, callable from any thread, and
    /// effective even when it precedes [`Provider::start`].
    fn stop(&self);

    /// Register the callback observing local registration changes.
    fn register_state_handler(&self, handler: StateHandler);

    /// Register a callback for availability changes of one endpoint.
    fn register_availability_handler(
        &self,
        service: ServiceId,
        instance: InstanceId,
        handler: AvailabilityHandler,
    );

    /// Register a callback for inbound messages matching the given key.
    ///
    /// Any of `service`, `instance`, `method` may be the corresponding
    /// `ANY_*` wildcard, matching every value in that position.
    fn register_message_handler(
        &self,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        handler: MessageHandler,
    );

    /// Drop every registered callback of all three kinds.
    fn clear_handlers(&self);

    /// Advertise a service endpoint.
    fn offer_service(&self, service: ServiceId, instance: InstanceId, major: u8, minor: u32);

    /// Withdraw a previously offered service endpoint.
    fn stop_offer_service(&self, service: ServiceId, instance: InstanceId);

    /// Advertise a publishable event under one or more event groups.
    fn offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        groups: &BTreeSet<EventgroupId>,
        config: &EventConfig,
    );

    /// Declare client interest, enabling future availability callbacks.
    fn request_service(&self, service: ServiceId, instance: InstanceId);

    /// Declare intent to receive an event before subscribing.
    fn request_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        groups: &BTreeSet<EventgroupId>,
    );

    /// Join an event group of an endpoint.
    fn subscribe(&self, service: ServiceId, instance: InstanceId, eventgroup: EventgroupId);

    /// Publish a payload snapshot to all current subscribers of an event.
    fn notify(&self, service: ServiceId, instance: InstanceId, event: EventId, payload: &Payload);

    /// Dispatch a request or response message.
    ///
    /// For requests the provider assigns the `(client, session)` pair in
    /// place; callers read it back for correlation and logging only.
    fn send(&self, message: &mut Message);

    /// Build an empty request message for the given transport.
    fn create_request(&self, reliable: bool) -> Message;

    /// Build a response correlated to `request` (client/session copied).
    fn create_response(&self, request: &Message) -> Message;

    /// Build an empty payload.
    fn create_payload(&self) -> Payload;
}
