// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # SOAM - Service-Oriented Application Middleware client core
//!
//! Coordination core for clients of a SOME/IP-style middleware runtime:
//! service offer/request, event publish/subscribe and RPC-style
//! request/response. The runtime itself (wire encoding, discovery,
//! transport) is an external collaborator behind the [`Provider`] trait;
//! this crate owns the part with real concurrency and lifecycle
//! invariants - the **state-gated action coordinator**.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use soam::{
//!     AvailabilityTracker, LifecycleController, LoopbackBus, Provider, ResubscribePolicy,
//!     ServiceKey, SubscribeCoordinator, SubscribePlan,
//! };
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! fn main() -> soam::Result<()> {
//!     let bus = LoopbackBus::new();
//!     let provider = bus.attach("client");
//!     let controller = Arc::new(LifecycleController::new(provider.clone()));
//!
//!     let tracker = Arc::clone(controller.tracker());
//!     controller.init(|provider| {
//!         let tracker = Arc::clone(&tracker);
//!         provider.register_availability_handler(
//!             0x1234,
//!             0x5678,
//!             Arc::new(move |service, instance, available| {
//!                 tracker.set_available(ServiceKey::new(service, instance), available);
//!             }),
//!         );
//!         Ok(())
//!     })?;
//!
//!     let coordinator = SubscribeCoordinator::new(
//!         controller.provider().clone(),
//!         Arc::clone(controller.tracker()),
//!         [ServiceKey::new(0x1234, 0x5678)],
//!         SubscribePlan { event: 0x0123, eventgroups: BTreeSet::from([0x0321]) },
//!         ResubscribePolicy::Once,
//!     );
//!     controller.start(move || coordinator.run())?;
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Provider`] | Capability surface of the external middleware runtime |
//! | [`AvailabilityTracker`] | Per-endpoint availability under one lock + condvar |
//! | [`SubscribeCoordinator`] | One-shot-per-key gated subscribe worker |
//! | [`CyclicRequester`] | Periodic request sender with interruptible sleep |
//! | [`DispatchTable`] | Wildcard message dispatch |
//! | [`RequestLedger`] | In-flight request correlation by (client, session) |
//! | [`LifecycleController`] | Start/stop sequencing and worker ownership |
//! | [`LoopbackBus`] | In-process provider for tests and demos |
//!
//! ## Concurrency model
//!
//! One provider-owned callback thread (opaque), exactly one coordinator
//! worker per sample. The availability map and shutdown flags are the
//! only cross-thread state, all guarded by a single mutex/condvar pair.
//! Waits are predicate-checking; shutdown wakes every waiter
//! unconditionally.

/// Per-endpoint availability tracking.
pub mod availability;
/// Client configuration (transport, request cycle).
pub mod config;
/// State-gated trigger coordinators (one-shot and cyclic).
pub mod coordinator;
/// Wildcard dispatch and request/response correlation.
pub mod correlator;
/// Lifecycle controller and shutdown token.
pub mod lifecycle;
/// In-process loopback provider (tests, demos).
pub mod loopback;
/// Capability provider trait and callback kinds.
pub mod provider;
/// Identifier and message types.
pub mod types;

pub use availability::{AvailabilityTracker, WaitOutcome};
pub use config::{ClientConfig, TransportMode};
pub use coordinator::{CyclicRequester, ResubscribePolicy, SubscribeCoordinator, SubscribePlan};
pub use correlator::{
    build_request, describe_notification, describe_response, DispatchTable, HandlerKey,
    PendingRequest, RequestLedger,
};
pub use lifecycle::{LifecycleController, LifecycleState, ShutdownToken, StopOrigin};
pub use loopback::{LoopbackBus, LoopbackProvider};
pub use provider::{
    AvailabilityHandler, EventConfig, EventKind, MessageHandler, Provider, RegistrationState,
    ReliabilityKind, StateHandler,
};
pub use types::{
    ClientId, EventId, EventgroupId, InstanceId, Message, MessageType, MethodId, Payload,
    ServiceId, ServiceKey, SessionId, ANY_INSTANCE, ANY_METHOD, ANY_SERVICE,
};

use std::fmt;

/// Errors reported by the coordination core.
///
/// Only initialization failure is fatal; steady-state provider
/// operations are fire-and-forget and report nothing here.
#[derive(Debug)]
pub enum Error {
    /// The provider failed to initialize. Fatal: callers exit non-zero
    /// and perform no further action.
    InitFailed(String),
    /// An operation was attempted in the wrong lifecycle state.
    InvalidState {
        /// State the controller was in.
        state: LifecycleState,
        /// Operation that was attempted.
        operation: &'static str,
    },
    /// Spawning the worker thread failed.
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InitFailed(reason) => write!(f, "couldn't initialize application: {reason}"),
            Error::InvalidState { state, operation } => {
                write!(f, "cannot {operation} while {state}")
            }
            Error::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
