// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle controller - start/stop sequencing for one sample process.
//!
//! Owns the provider handle, the availability tracker, the shutdown
//! token and the single coordinator worker thread. The controller walks
//! `Created -> Initialized -> Running -> Stopping -> Stopped`.
//!
//! Stop may originate on an external thread (signal handler, test
//! driver) or on the worker thread itself. Instead of comparing thread
//! identities, [`LifecycleController::stop`] takes an explicit
//! [`StopOrigin`]: an external stop joins the worker inline, a self-stop
//! defers the join to [`LifecycleController::start`]'s unwind after the
//! provider loop returns, so no thread ever joins itself.

use crate::availability::AvailabilityTracker;
use crate::provider::Provider;
use crate::types::ServiceKey;
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Lifecycle states of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, provider untouched.
    Created,
    /// Provider initialized, callbacks registered.
    Initialized,
    /// Worker spawned, provider loop running.
    Running,
    /// Stop requested, teardown in progress.
    Stopping,
    /// Worker joined, provider stopped.
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Which thread initiated a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOrigin {
    /// Stop initiated off the worker thread (signal handler, main, test).
    External,
    /// Stop initiated on the coordinator worker thread itself.
    Worker,
}

struct TokenInner {
    triggered: Mutex<bool>,
    wake: Condvar,
}

/// Cancellation token set once at shutdown and observed by workers.
///
/// Replaces the raw signal-handler-to-object pointer of the classic
/// sample pattern: the signal handler clones the token and triggers it;
/// workers poll it or sleep on it with [`ShutdownToken::wait_timeout`].
#[derive(Clone)]
pub struct ShutdownToken {
    inner: Arc<TokenInner>,
}

impl ShutdownToken {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                triggered: Mutex::new(false),
                wake: Condvar::new(),
            }),
        }
    }

    /// Trigger the token, waking every sleeper. Idempotent.
    pub fn trigger(&self) {
        {
            let mut triggered = self.inner.triggered.lock();
            *triggered = true;
        }
        self.inner.wake.notify_all();
    }

    /// Whether the token has been triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.lock()
    }

    /// Sleep up to `timeout`, returning early if the token triggers.
    ///
    /// Returns `true` when the token was triggered, `false` on a full
    /// sleep. This is the interruptible replacement for a fixed
    /// `thread::sleep` in cyclic loops: stop latency is bounded by
    /// detection, not by the sleep interval.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.inner.triggered.lock();
        loop {
            if *triggered {
                return true;
            }
            if self.inner.wake.wait_until(&mut triggered, deadline).timed_out() {
                return *triggered;
            }
        }
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns start/stop sequencing for one middleware sample.
///
/// The controller is the explicit context object the callbacks and the
/// coordinator share; nothing in this crate relies on process-wide
/// globals.
pub struct LifecycleController {
    provider: Arc<dyn Provider>,
    tracker: Arc<AvailabilityTracker>,
    token: ShutdownToken,
    state: Mutex<LifecycleState>,
    offered: Mutex<Vec<ServiceKey>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleController {
    /// Create a controller in the `Created` state.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            tracker: Arc::new(AvailabilityTracker::new()),
            token: ShutdownToken::new(),
            state: Mutex::new(LifecycleState::Created),
            offered: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
        }
    }

    /// The provider handle this controller owns.
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// The availability tracker shared with callbacks and coordinators.
    #[must_use]
    pub fn tracker(&self) -> &Arc<AvailabilityTracker> {
        &self.tracker
    }

    /// A clone of the shutdown token.
    #[must_use]
    pub fn shutdown_token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Initialize the provider and register callbacks.
    ///
    /// `setup` runs after a successful provider `init` and is where the
    /// caller registers its state/availability/message handlers. On
    /// provider init failure the error propagates and no further action
    /// is taken; callers are expected to exit non-zero.
    pub fn init<F>(&self, setup: F) -> Result<()>
    where
        F: FnOnce(&Arc<dyn Provider>) -> Result<()>,
    {
        {
            let state = self.state.lock();
            if *state != LifecycleState::Created {
                return Err(Error::InvalidState {
                    state: *state,
                    operation: "init",
                });
            }
        }

        self.provider.init()?;
        setup(&self.provider)?;

        *self.state.lock() = LifecycleState::Initialized;
        log::debug!("[lifecycle] initialized");
        Ok(())
    }

    /// Offer a service through the controller.
    ///
    /// Offers made here are withdrawn automatically during `stop`.
    pub fn offer(&self, key: ServiceKey, major: u8, minor: u32) {
        self.provider.offer_service(key.service, key.instance, major, minor);
        self.offered.lock().push(key);
        log::info!("[lifecycle] offering service {key}");
    }

    /// Spawn the coordinator worker, then run the provider loop.
    ///
    /// Blocks on the calling thread until the provider loop returns
    /// (i.e. until `stop`). The worker thread is spawned first so the
    /// shared tracker and token exist before anything reads them. Any
    /// worker join deferred by a self-stop happens here before the
    /// controller reports `Stopped`.
    pub fn start<F>(&self, worker: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if *state != LifecycleState::Initialized {
                return Err(Error::InvalidState {
                    state: *state,
                    operation: "start",
                });
            }
            *state = LifecycleState::Running;
        }

        let handle = std::thread::Builder::new()
            .name("soam-worker".into())
            .spawn(worker)
            .map_err(Error::Io)?;
        *self.worker.lock() = Some(handle);

        // A stop may have completed while the worker was being spawned;
        // the provider is already stopped then and must not be re-entered.
        if self.token.is_triggered() {
            log::debug!("[lifecycle] stop won the race to the provider loop");
        } else {
            log::debug!("[lifecycle] running");
            self.provider.start();
        }

        // Provider loop done. Join the worker if stop deferred it.
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        *self.state.lock() = LifecycleState::Stopped;
        log::debug!("[lifecycle] stopped");
        Ok(())
    }

    /// Run the stop sequence.
    ///
    /// Clears all callbacks, withdraws offers made through the
    /// controller, triggers the shutdown token, wakes the tracker
    /// unconditionally so a blocked coordinator observes shutdown, then
    /// stops the provider. Idempotent; later calls return immediately.
    ///
    /// With [`StopOrigin::External`] the worker is joined here. With
    /// [`StopOrigin::Worker`] the join is deferred to the thread blocked
    /// in [`LifecycleController::start`] - the worker finalizes
    /// asynchronously and is never asked to join itself. A worker-origin
    /// stop issued while no worker exists completes the transition to
    /// `Stopped` directly.
    pub fn stop(&self, origin: StopOrigin) {
        {
            let mut state = self.state.lock();
            if matches!(*state, LifecycleState::Stopping | LifecycleState::Stopped) {
                return;
            }
            *state = LifecycleState::Stopping;
        }
        log::info!("[lifecycle] stopping (origin: {origin:?})");

        self.provider.clear_handlers();
        for key in self.offered.lock().drain(..) {
            self.provider.stop_offer_service(key.service, key.instance);
        }

        self.token.trigger();
        self.tracker.request_shutdown();

        if origin == StopOrigin::External {
            if let Some(handle) = self.worker.lock().take() {
                let _ = handle.join();
            }
        }

        self.provider.stop();

        // A worker-origin stop normally leaves the final transition to
        // the thread unwinding in `start`; with no worker there is no
        // such thread, so finish here.
        if origin == StopOrigin::External || self.worker.lock().is_none() {
            *self.state.lock() = LifecycleState::Stopped;
        }
    }
}
