// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process loopback provider for tests and demos.
//!
//! [`LoopbackBus`] hosts any number of nodes, each a full [`Provider`].
//! Offers fire availability callbacks on nodes with a matching handler;
//! requests are routed to offering nodes with the `(client, session)`
//! pair assigned per sending node; responses are routed back by client
//! id; notifications go to subscribed nodes.
//!
//! This is routing glue, not a middleware: there is no wire format, no
//! discovery protocol and no transport. Callbacks are always invoked
//! after every bus lock has been released, so handlers may freely
//! re-enter the provider.

use crate::correlator::{DispatchTable, HandlerKey};
use crate::provider::{
    AvailabilityHandler, EventConfig, MessageHandler, Provider, RegistrationState, StateHandler,
};
use crate::types::{
    ClientId, EventId, EventgroupId, InstanceId, Message, MessageType, MethodId, Payload,
    ServiceId, ServiceKey, ANY_INSTANCE, ANY_SERVICE,
};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

/// Event loop state of one node. `Stopped` is sticky so a stop that
/// precedes `start` keeps the loop from ever entering its wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct NodeInner {
    name: String,
    client_id: ClientId,
    next_session: AtomicU16,
    fail_next_init: AtomicBool,
    run_state: Mutex<RunState>,
    run_wake: Condvar,
    state_handler: Mutex<Option<StateHandler>>,
    availability_handlers: Mutex<Vec<((ServiceId, InstanceId), AvailabilityHandler)>>,
    messages: DispatchTable,
    offers: Mutex<BTreeSet<ServiceKey>>,
    offered_events: Mutex<BTreeMap<(ServiceKey, EventId), BTreeSet<EventgroupId>>>,
    requests: Mutex<BTreeSet<ServiceKey>>,
    requested_events: Mutex<BTreeMap<(ServiceKey, EventId), BTreeSet<EventgroupId>>>,
    subscriptions: Mutex<BTreeSet<(ServiceKey, EventgroupId)>>,
}

impl NodeInner {
    fn matching_availability_handlers(&self, key: ServiceKey) -> Vec<AvailabilityHandler> {
        self.availability_handlers
            .lock()
            .iter()
            .filter(|((service, instance), _)| {
                (*service == ANY_SERVICE || *service == key.service)
                    && (*instance == ANY_INSTANCE || *instance == key.instance)
            })
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }

    fn is_subscribed(&self, key: ServiceKey, groups: &BTreeSet<EventgroupId>) -> bool {
        let subscriptions = self.subscriptions.lock();
        if groups.is_empty() {
            subscriptions.iter().any(|(sub_key, _)| *sub_key == key)
        } else {
            groups
                .iter()
                .any(|group| subscriptions.contains(&(key, *group)))
        }
    }
}

struct BusInner {
    nodes: Mutex<Vec<Arc<NodeInner>>>,
    next_client: AtomicU16,
}

impl BusInner {
    fn all_nodes(&self) -> Vec<Arc<NodeInner>> {
        self.nodes.lock().clone()
    }

    /// Collect availability handlers interested in `key` across the bus.
    fn availability_targets(&self, key: ServiceKey) -> Vec<AvailabilityHandler> {
        let mut targets = Vec::new();
        for node in self.all_nodes() {
            targets.extend(node.matching_availability_handlers(key));
        }
        targets
    }

    fn announce(&self, key: ServiceKey, available: bool) {
        // Locks are released before any callback runs.
        let targets = self.availability_targets(key);
        for handler in targets {
            handler(key.service, key.instance, available);
        }
    }
}

/// In-memory bus connecting loopback provider nodes.
#[derive(Clone)]
pub struct LoopbackBus {
    inner: Arc<BusInner>,
}

impl LoopbackBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                nodes: Mutex::new(Vec::new()),
                next_client: AtomicU16::new(0x0101),
            }),
        }
    }

    /// Attach a named node and return its provider handle.
    ///
    /// Each node gets a distinct client id; sessions are assigned per
    /// node starting at 1.
    pub fn attach(&self, name: &str) -> Arc<LoopbackProvider> {
        let client_id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        let node = Arc::new(NodeInner {
            name: name.to_string(),
            client_id,
            next_session: AtomicU16::new(1),
            fail_next_init: AtomicBool::new(false),
            run_state: Mutex::new(RunState::Idle),
            run_wake: Condvar::new(),
            state_handler: Mutex::new(None),
            availability_handlers: Mutex::new(Vec::new()),
            messages: DispatchTable::new(),
            offers: Mutex::new(BTreeSet::new()),
            offered_events: Mutex::new(BTreeMap::new()),
            requests: Mutex::new(BTreeSet::new()),
            requested_events: Mutex::new(BTreeMap::new()),
            subscriptions: Mutex::new(BTreeSet::new()),
        });
        self.inner.nodes.lock().push(Arc::clone(&node));
        log::debug!("[loopback] attached node '{name}' as client {client_id:04x}");
        Arc::new(LoopbackProvider {
            bus: Arc::clone(&self.inner),
            node,
        })
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One node of the loopback bus; implements [`Provider`].
pub struct LoopbackProvider {
    bus: Arc<BusInner>,
    node: Arc<NodeInner>,
}

impl LoopbackProvider {
    /// The node's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// The client id assigned to this node.
    #[must_use]
    pub fn client_id(&self) -> ClientId {
        self.node.client_id
    }

    /// Make the next `init` call fail (test knob).
    pub fn fail_next_init(&self) {
        self.node.fail_next_init.store(true, Ordering::SeqCst);
    }

    /// Whether the node's event loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.node.run_state.lock() == RunState::Running
    }

    /// Total registered handlers of all three kinds.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        let state = usize::from(self.node.state_handler.lock().is_some());
        state + self.node.availability_handlers.lock().len() + self.node.messages.len()
    }

    /// Active event group subscriptions of this node.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.node.subscriptions.lock().len()
    }

    /// Services currently offered by this node.
    #[must_use]
    pub fn offered_services(&self) -> Vec<ServiceKey> {
        self.node.offers.lock().iter().copied().collect()
    }

    /// Events this node declared interest in via `request_event`.
    #[must_use]
    pub fn requested_event_count(&self) -> usize {
        self.node.requested_events.lock().len()
    }
}

impl Provider for LoopbackProvider {
    fn init(&self) -> Result<()> {
        if self.node.fail_next_init.swap(false, Ordering::SeqCst) {
            return Err(Error::InitFailed(format!(
                "loopback node '{}' refused init",
                self.node.name
            )));
        }
        Ok(())
    }

    fn start(&self) {
        {
            let mut state = self.node.run_state.lock();
            if *state == RunState::Stopped {
                return;
            }
            *state = RunState::Running;
        }

        // Registration is reported from a provider-owned thread, never
        // the caller's.
        let state_handler = self.node.state_handler.lock().clone();
        if let Some(handler) = state_handler {
            std::thread::spawn(move || handler(RegistrationState::Registered));
        }

        let mut state = self.node.run_state.lock();
        while *state == RunState::Running {
            self.node.run_wake.wait(&mut state);
        }
    }

    fn stop(&self) {
        {
            let mut state = self.node.run_state.lock();
            *state = RunState::Stopped;
        }
        self.node.run_wake.notify_all();
    }

    fn register_state_handler(&self, handler: StateHandler) {
        *self.node.state_handler.lock() = Some(handler);
    }

    fn register_availability_handler(
        &self,
        service: ServiceId,
        instance: InstanceId,
        handler: AvailabilityHandler,
    ) {
        self.node
            .availability_handlers
            .lock()
            .push(((service, instance), handler.clone()));

        // Report current state for endpoints already offered on the bus.
        let mut offered = Vec::new();
        for node in self.bus.all_nodes() {
            for key in node.offers.lock().iter() {
                if (service == ANY_SERVICE || service == key.service)
                    && (instance == ANY_INSTANCE || instance == key.instance)
                {
                    offered.push(*key);
                }
            }
        }
        for key in offered {
            handler(key.service, key.instance, true);
        }
    }

    fn register_message_handler(
        &self,
        service: ServiceId,
        instance: InstanceId,
        method: MethodId,
        handler: MessageHandler,
    ) {
        self.node
            .messages
            .register(HandlerKey::new(service, instance, method), handler);
    }

    fn clear_handlers(&self) {
        *self.node.state_handler.lock() = None;
        self.node.availability_handlers.lock().clear();
        self.node.messages.clear();
    }

    fn offer_service(&self, service: ServiceId, instance: InstanceId, _major: u8, _minor: u32) {
        let key = ServiceKey::new(service, instance);
        self.node.offers.lock().insert(key);
        log::debug!("[loopback] '{}' offers {key}", self.node.name);
        self.bus.announce(key, true);
    }

    fn stop_offer_service(&self, service: ServiceId, instance: InstanceId) {
        let key = ServiceKey::new(service, instance);
        let was_offered = self.node.offers.lock().remove(&key);
        if was_offered {
            log::debug!("[loopback] '{}' withdraws {key}", self.node.name);
            self.bus.announce(key, false);
        }
    }

    fn offer_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        groups: &BTreeSet<EventgroupId>,
        _config: &EventConfig,
    ) {
        let key = ServiceKey::new(service, instance);
        self.node
            .offered_events
            .lock()
            .entry((key, event))
            .or_default()
            .extend(groups.iter().copied());
    }

    fn request_service(&self, service: ServiceId, instance: InstanceId) {
        let key = ServiceKey::new(service, instance);
        self.node.requests.lock().insert(key);

        let already_offered = self
            .bus
            .all_nodes()
            .iter()
            .any(|node| node.offers.lock().contains(&key));
        if already_offered {
            let handlers = self.node.matching_availability_handlers(key);
            for handler in handlers {
                handler(key.service, key.instance, true);
            }
        }
    }

    fn request_event(
        &self,
        service: ServiceId,
        instance: InstanceId,
        event: EventId,
        groups: &BTreeSet<EventgroupId>,
    ) {
        let key = ServiceKey::new(service, instance);
        self.node
            .requested_events
            .lock()
            .entry((key, event))
            .or_default()
            .extend(groups.iter().copied());
    }

    fn subscribe(&self, service: ServiceId, instance: InstanceId, eventgroup: EventgroupId) {
        let key = ServiceKey::new(service, instance);
        self.node.subscriptions.lock().insert((key, eventgroup));
        log::debug!(
            "[loopback] '{}' subscribed to {key} group {eventgroup:04x}",
            self.node.name
        );
    }

    fn notify(&self, service: ServiceId, instance: InstanceId, event: EventId, payload: &Payload) {
        let key = ServiceKey::new(service, instance);
        let groups = self
            .node
            .offered_events
            .lock()
            .get(&(key, event))
            .cloned()
            .unwrap_or_default();

        let notification = Message {
            service,
            instance,
            method: event,
            message_type: MessageType::Notification,
            interface_version: 1,
            reliable: true,
            client: 0,
            session: 0,
            payload: payload.clone(),
        };

        let targets: Vec<Arc<NodeInner>> = self
            .bus
            .all_nodes()
            .into_iter()
            .filter(|node| node.is_subscribed(key, &groups))
            .collect();
        for node in targets {
            node.messages.dispatch(&notification);
        }
    }

    fn send(&self, message: &mut Message) {
        match message.message_type {
            MessageType::Request | MessageType::RequestNoReturn => {
                message.client = self.node.client_id;
                message.session = self.node.next_session.fetch_add(1, Ordering::Relaxed);
                let key = message.key();
                let targets: Vec<Arc<NodeInner>> = self
                    .bus
                    .all_nodes()
                    .into_iter()
                    .filter(|node| node.offers.lock().contains(&key))
                    .collect();
                if targets.is_empty() {
                    log::warn!("[loopback] request to unoffered {key} dropped");
                }
                for node in targets {
                    node.messages.dispatch(message);
                }
            }
            MessageType::Response | MessageType::Error => {
                let target = self
                    .bus
                    .all_nodes()
                    .into_iter()
                    .find(|node| node.client_id == message.client);
                match target {
                    Some(node) => {
                        node.messages.dispatch(message);
                    }
                    None => {
                        log::warn!(
                            "[loopback] response to unknown client {:04x} dropped",
                            message.client
                        );
                    }
                }
            }
            MessageType::Notification => {
                self.notify(message.service, message.instance, message.method, &message.payload);
            }
        }
    }

    fn create_request(&self, reliable: bool) -> Message {
        Message {
            service: 0,
            instance: 0,
            method: 0,
            message_type: MessageType::Request,
            interface_version: 1,
            reliable,
            client: 0,
            session: 0,
            payload: Payload::new(),
        }
    }

    fn create_response(&self, request: &Message) -> Message {
        Message {
            service: request.service,
            instance: request.instance,
            method: request.method,
            message_type: MessageType::Response,
            interface_version: request.interface_version,
            reliable: request.reliable,
            client: request.client,
            session: request.session,
            payload: Payload::new(),
        }
    }

    fn create_payload(&self) -> Payload {
        Payload::new()
    }
}
