// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response correlation and wildcard message dispatch.
//!
//! Outbound requests are tagged by the provider with a
//! `(client, session)` pair on send; this module records them in a
//! [`RequestLedger`] and resolves inbound responses against it, always
//! propagating the pair unchanged. Inbound dispatch is keyed by
//! `(service, instance, method)` where any position may be the `ANY_*`
//! wildcard.
//!
//! Log rendering of payloads is `(length) hex bytes` in that order;
//! tests compare against these strings.

use crate::provider::{MessageHandler, Provider};
use crate::types::{
    ClientId, InstanceId, Message, MessageType, MethodId, Payload, ServiceId, ServiceKey,
    SessionId, ANY_INSTANCE, ANY_METHOD, ANY_SERVICE,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

/// Three-part dispatch key with wildcard positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerKey {
    /// Service id or [`ANY_SERVICE`].
    pub service: ServiceId,
    /// Instance id or [`ANY_INSTANCE`].
    pub instance: InstanceId,
    /// Method id or [`ANY_METHOD`].
    pub method: MethodId,
}

impl HandlerKey {
    /// Key matching every inbound message.
    pub const ANY: HandlerKey = HandlerKey {
        service: ANY_SERVICE,
        instance: ANY_INSTANCE,
        method: ANY_METHOD,
    };

    /// Create a dispatch key.
    #[must_use]
    pub const fn new(service: ServiceId, instance: InstanceId, method: MethodId) -> Self {
        Self {
            service,
            instance,
            method,
        }
    }

    /// Whether this key matches the given message.
    #[must_use]
    pub fn matches(&self, message: &Message) -> bool {
        (self.service == ANY_SERVICE || self.service == message.service)
            && (self.instance == ANY_INSTANCE || self.instance == message.instance)
            && (self.method == ANY_METHOD || self.method == message.method)
    }
}

/// Registry of message handlers with wildcard matching.
///
/// Handlers are invoked outside the table lock, so a handler may
/// re-enter the provider (send a response, subscribe) without
/// deadlocking the dispatcher.
pub struct DispatchTable {
    handlers: Mutex<Vec<(HandlerKey, MessageHandler)>>,
}

impl DispatchTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Register a handler under the given key.
    pub fn register(&self, key: HandlerKey, handler: MessageHandler) {
        self.handlers.lock().push((key, handler));
    }

    /// Drop all registered handlers.
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.lock().is_empty()
    }

    /// Invoke every handler matching `message`; returns how many ran.
    pub fn dispatch(&self, message: &Message) -> usize {
        let matching: Vec<MessageHandler> = {
            let handlers = self.handlers.lock();
            handlers
                .iter()
                .filter(|(key, _)| key.matches(message))
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in &matching {
            handler(message);
        }
        matching.len()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

/// An outbound request awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Target endpoint the request was sent to.
    pub target: ServiceKey,
    /// Method the request addressed.
    pub method: MethodId,
    /// Payload bytes that were sent.
    pub payload: Payload,
    /// When the request was recorded.
    pub sent_at: Instant,
}

/// In-flight request registry keyed by the provider-assigned pair.
///
/// The ledger never generates identifiers; it only records what the
/// provider assigned on send and matches responses against it.
pub struct RequestLedger {
    inflight: DashMap<(ClientId, SessionId), PendingRequest>,
}

impl RequestLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Record a just-sent request under its assigned (client, session).
    ///
    /// Non-request messages are ignored.
    pub fn record(&self, message: &Message) {
        if !matches!(
            message.message_type,
            MessageType::Request | MessageType::RequestNoReturn
        ) {
            return;
        }
        self.inflight.insert(
            (message.client, message.session),
            PendingRequest {
                target: message.key(),
                method: message.method,
                payload: message.payload.clone(),
                sent_at: Instant::now(),
            },
        );
    }

    /// Resolve an inbound response against its pending request.
    pub fn resolve(&self, response: &Message) -> Option<PendingRequest> {
        self.inflight
            .remove(&(response.client, response.session))
            .map(|(_, pending)| pending)
    }

    /// Number of requests still awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    /// Whether no requests are in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Build an outbound request for the given target method.
///
/// The `(client, session)` pair stays zero until the provider assigns
/// it on send.
#[must_use]
pub fn build_request(
    provider: &dyn Provider,
    target: ServiceKey,
    method: MethodId,
    reliable: bool,
    payload: Payload,
) -> Message {
    let mut request = provider.create_request(reliable);
    request.service = target.service;
    request.instance = target.instance;
    request.method = method;
    request.interface_version = 1;
    request.payload = payload;
    request
}

/// Canonical log line for a received response.
#[must_use]
pub fn describe_response(message: &Message) -> String {
    format!(
        "Received a response from Service [{:04x}.{:04x}] to Client/Session [{:04x}/{:04x}]",
        message.service, message.instance, message.client, message.session
    )
}

/// Canonical log line for a received notification, payload rendered as
/// length then hex bytes.
#[must_use]
pub fn describe_notification(message: &Message) -> String {
    format!(
        "received a notification for event [{:04x}.{:04x}.{:04x}] to Client/Session [{:04x}/{:04x}] = {}",
        message.service,
        message.instance,
        message.method,
        message.client,
        message.session,
        message.payload
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(service: ServiceId, instance: InstanceId, method: MethodId) -> Message {
        Message {
            service,
            instance,
            method,
            message_type: MessageType::Response,
            interface_version: 1,
            reliable: true,
            client: 0x0101,
            session: 0x0001,
            payload: Payload::new(),
        }
    }

    fn counting_handler(counter: Arc<AtomicUsize>) -> MessageHandler {
        Arc::new(move |_message: &Message| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn wildcard_handler_receives_every_message() {
        let table = DispatchTable::new();
        let counter = Arc::new(AtomicUsize::new(0));
        table.register(HandlerKey::ANY, counting_handler(Arc::clone(&counter)));

        assert_eq!(table.dispatch(&message(0x1234, 0x5678, 0x0123)), 1);
        assert_eq!(table.dispatch(&message(0xaaaa, 0xbbbb, 0xcccc)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concrete_handler_receives_exact_matches_only() {
        let table = DispatchTable::new();
        let counter = Arc::new(AtomicUsize::new(0));
        table.register(
            HandlerKey::new(0x1234, 0x5678, 0x0123),
            counting_handler(Arc::clone(&counter)),
        );

        assert_eq!(table.dispatch(&message(0x1234, 0x5678, 0x0123)), 1);
        assert_eq!(table.dispatch(&message(0x1234, 0x5678, 0x0124)), 0);
        assert_eq!(table.dispatch(&message(0x1235, 0x5678, 0x0123)), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn instance_scoped_handler_spans_service_ids() {
        // The multiple-services pattern: one handler keyed on a single
        // instance with ANY_SERVICE catches traffic from several services
        // and disambiguates by inspecting message.service afterwards.
        let table = DispatchTable::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        table.register(
            HandlerKey::new(ANY_SERVICE, 0x5678, ANY_METHOD),
            Arc::new(move |message: &Message| {
                sink.lock().push(message.service);
            }),
        );

        table.dispatch(&message(0x1234, 0x5678, 0x0001));
        table.dispatch(&message(0x1235, 0x5678, 0x0002));
        table.dispatch(&message(0x1234, 0x9999, 0x0001));

        assert_eq!(*seen.lock(), vec![0x1234, 0x1235]);
    }

    #[test]
    fn clear_drops_all_handlers() {
        let table = DispatchTable::new();
        table.register(HandlerKey::ANY, Arc::new(|_: &Message| {}));
        assert_eq!(table.len(), 1);
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.dispatch(&message(0x1234, 0x5678, 0x0123)), 0);
    }

    #[test]
    fn handler_may_reenter_the_table() {
        let table = Arc::new(DispatchTable::new());
        let inner = Arc::clone(&table);
        let counter = Arc::new(AtomicUsize::new(0));
        let inner_counter = Arc::clone(&counter);
        table.register(
            HandlerKey::new(0x1234, 0x5678, 0x0001),
            Arc::new(move |_message: &Message| {
                // Dispatch a different key from inside a handler.
                inner.dispatch(&message(0x1234, 0x5678, 0x0002));
                inner_counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(table.dispatch(&message(0x1234, 0x5678, 0x0001)), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn ledger_resolves_by_client_session() {
        let ledger = RequestLedger::new();
        let mut request = message(0x1234, 0x5678, 0x0123);
        request.message_type = MessageType::Request;
        request.client = 0x0101;
        request.session = 0x0007;
        ledger.record(&request);
        assert_eq!(ledger.len(), 1);

        let mut response = message(0x1234, 0x5678, 0x0123);
        response.client = 0x0101;
        response.session = 0x0007;
        let pending = ledger.resolve(&response).expect("pending request");
        assert_eq!(pending.target, ServiceKey::new(0x1234, 0x5678));
        assert_eq!(pending.method, 0x0123);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_ignores_non_requests() {
        let ledger = RequestLedger::new();
        ledger.record(&message(0x1234, 0x5678, 0x0123));
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_misses_unknown_session() {
        let ledger = RequestLedger::new();
        let mut response = message(0x1234, 0x5678, 0x0123);
        response.session = 0x0042;
        assert!(ledger.resolve(&response).is_none());
    }

    #[test]
    fn response_log_renders_correlation_pair() {
        let mut response = message(0x1234, 0x5678, 0x0123);
        response.client = 0x0101;
        response.session = 0x000a;
        assert_eq!(
            describe_response(&response),
            "Received a response from Service [1234.5678] to Client/Session [0101/000a]"
        );
    }

    #[test]
    fn notification_log_renders_length_then_bytes() {
        let mut notification = message(0x1234, 0x5678, 0x0123);
        notification.message_type = MessageType::Notification;
        notification.client = 0x0000;
        notification.session = 0x0000;
        notification.payload = Payload::from_bytes(vec![0x00, 0x01, 0xff]);
        assert_eq!(
            describe_notification(&notification),
            "received a notification for event [1234.5678.0123] to Client/Session [0000/0000] = (3) 00 01 ff "
        );
    }
}
