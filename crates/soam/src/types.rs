// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Core identifier and message types shared by every SOAM component.
//!
//! All identifiers are 16-bit values, matching the wire-level identifier
//! width of SOME/IP-style middlewares. `0xFFFF` is reserved in each
//! position as the "match all" wildcard used by message dispatch.

use std::fmt;

/// Identifier of a logical service interface.
pub type ServiceId = u16;
/// Identifier of one deployed instance of a service.
pub type InstanceId = u16;
/// Identifier of a callable method within a service.
pub type MethodId = u16;
/// Identifier of a publishable event. Events share the method id space.
pub type EventId = u16;
/// Identifier of an event group (subscription unit).
pub type EventgroupId = u16;
/// Identifier the middleware assigns to a client application.
pub type ClientId = u16;
/// Per-request correlation value assigned by the middleware on send.
pub type SessionId = u16;

/// Wildcard service id - matches any service in a handler registration.
pub const ANY_SERVICE: ServiceId = 0xFFFF;
/// Wildcard instance id - matches any instance in a handler registration.
pub const ANY_INSTANCE: InstanceId = 0xFFFF;
/// Wildcard method id - matches any method or event in a handler registration.
pub const ANY_METHOD: MethodId = 0xFFFF;

/// A (service, instance) pair identifying one remote service endpoint.
///
/// Keys are totally ordered so multi-key coordinator passes run in
/// ascending key order. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    /// Service interface identifier.
    pub service: ServiceId,
    /// Deployed instance identifier.
    pub instance: InstanceId,
}

impl ServiceKey {
    /// Create a new service key.
    #[must_use]
    pub const fn new(service: ServiceId, instance: InstanceId) -> Self {
        Self { service, instance }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:04x}.{:04x}]", self.service, self.instance)
    }
}

/// Kind of a middleware message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Request expecting a response.
    Request,
    /// Fire-and-forget request.
    RequestNoReturn,
    /// Response to a previous request.
    Response,
    /// Event notification delivered to subscribers.
    Notification,
    /// Error response.
    Error,
}

/// Ordered byte payload carried by messages and notifications.
///
/// The `Display` rendering is `(<length>) <hex bytes>` with a
/// length-then-bytes ordering; log comparisons depend on it staying
/// that way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    data: Vec<u8>,
}

impl Payload {
    /// Create an empty payload.
    #[must_use]
    pub const fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create a payload from owned bytes.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Replace the payload contents in place.
    pub fn set_data(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    /// Borrow the payload bytes.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) ", self.data.len())?;
        for byte in &self.data {
            write!(f, "{byte:02x} ")?;
        }
        Ok(())
    }
}

/// A middleware message (request, response or notification).
///
/// The `(client, session)` correlation pair is owned by the capability
/// provider: it is assigned when a request is sent and must be
/// propagated unchanged into response handling and logging.
#[derive(Debug, Clone)]
pub struct Message {
    /// Target or originating service id.
    pub service: ServiceId,
    /// Target or originating instance id.
    pub instance: InstanceId,
    /// Method id (event id for notifications).
    pub method: MethodId,
    /// Message kind.
    pub message_type: MessageType,
    /// Major interface version the message was built against.
    pub interface_version: u8,
    /// Whether the message travels over the reliable transport.
    pub reliable: bool,
    /// Client id, provider-assigned on send for requests.
    pub client: ClientId,
    /// Session id, provider-assigned on send for requests.
    pub session: SessionId,
    /// Message payload.
    pub payload: Payload,
}

impl Message {
    /// The (service, instance) endpoint this message refers to.
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.service, self.instance)
    }
}
