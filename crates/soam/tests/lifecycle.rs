// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lifecycle sequencing and end-to-end behavior over the loopback bus.

use soam::{
    build_request, describe_notification, Error, EventConfig, LifecycleController, LifecycleState,
    LoopbackBus, LoopbackProvider, Message, MessageType, Payload, Provider, RequestLedger,
    ResubscribePolicy, ServiceKey, StopOrigin, SubscribeCoordinator, SubscribePlan, ANY_METHOD,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

const SERVICE: u16 = 0x1234;
const INSTANCE: u16 = 0x5678;
const KEY: ServiceKey = ServiceKey::new(SERVICE, INSTANCE);
const EVENT: u16 = 0x0123;
const GROUP: u16 = 0x0321;

fn eventually(budget: Duration, probe: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if probe() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    probe()
}

/// Wire the controller's tracker to provider availability callbacks.
fn track_availability(controller: &LifecycleController) {
    let tracker = Arc::clone(controller.tracker());
    controller.provider().register_availability_handler(
        SERVICE,
        INSTANCE,
        Arc::new(move |service, instance, available| {
            tracker.set_available(ServiceKey::new(service, instance), available);
        }),
    );
}

/// Run `controller.start(worker)` on its own thread and hand back a
/// completion receiver so tests can bound the shutdown.
fn start_detached<F>(
    controller: &Arc<LifecycleController>,
    worker: F,
) -> mpsc::Receiver<soam::Result<()>>
where
    F: FnOnce() + Send + 'static,
{
    let controller = Arc::clone(controller);
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(controller.start(worker));
    });
    rx
}

fn client_with_controller(bus: &LoopbackBus) -> (Arc<LoopbackProvider>, Arc<LifecycleController>) {
    let provider = bus.attach("client");
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&provider) as Arc<dyn Provider>
    ));
    (provider, controller)
}

#[test]
fn init_failure_is_fatal_and_leaves_controller_created() {
    let bus = LoopbackBus::new();
    let (provider, controller) = client_with_controller(&bus);
    provider.fail_next_init();

    let result = controller.init(|_| Ok(()));
    assert!(matches!(result, Err(Error::InitFailed(_))));
    assert_eq!(controller.state(), LifecycleState::Created);
}

#[test]
fn start_before_init_is_rejected() {
    let bus = LoopbackBus::new();
    let (_provider, controller) = client_with_controller(&bus);
    let result = controller.start(|| {});
    assert!(matches!(
        result,
        Err(Error::InvalidState {
            state: LifecycleState::Created,
            operation: "start"
        })
    ));
}

#[test]
fn external_stop_joins_worker_and_tears_down() {
    let bus = LoopbackBus::new();
    let (provider, controller) = client_with_controller(&bus);

    controller
        .init(|_| Ok(()))
        .expect("init should succeed");
    track_availability(&controller);
    controller.offer(KEY, 1, 0);
    assert_eq!(provider.offered_services(), vec![KEY]);

    let tracker = Arc::clone(controller.tracker());
    let done = start_detached(&controller, move || {
        // Worker parks until the stop sequence wakes it.
        let _ = tracker.wait_until(|_| false);
    });
    assert!(eventually(Duration::from_secs(2), || {
        controller.state() == LifecycleState::Running && provider.is_running()
    }));

    controller.stop(StopOrigin::External);

    done.recv_timeout(Duration::from_secs(5))
        .expect("start did not return after external stop")
        .expect("start reported an error");
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(!provider.is_running());
    assert_eq!(provider.handler_count(), 0);
    assert!(provider.offered_services().is_empty());
}

#[test]
fn repeated_stop_is_idempotent() {
    let bus = LoopbackBus::new();
    let (_provider, controller) = client_with_controller(&bus);
    controller.init(|_| Ok(())).expect("init should succeed");

    let tracker = Arc::clone(controller.tracker());
    let done = start_detached(&controller, move || {
        let _ = tracker.wait_until(|_| false);
    });
    assert!(eventually(Duration::from_secs(2), || {
        controller.state() == LifecycleState::Running
    }));

    controller.stop(StopOrigin::External);
    controller.stop(StopOrigin::External);
    done.recv_timeout(Duration::from_secs(5))
        .expect("start did not return")
        .expect("start reported an error");
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[test]
fn stop_completing_during_the_start_window_still_unblocks_start() {
    let bus = LoopbackBus::new();
    let (provider, controller) = client_with_controller(&bus);
    controller.init(|_| Ok(())).expect("init should succeed");

    // Emulate a stop sequence that wins the race between the Running
    // transition and the provider loop: the token is triggered and the
    // provider already stopped by the time start reaches it.
    controller.shutdown_token().trigger();
    controller.provider().stop();

    let done = start_detached(&controller, || {});
    done.recv_timeout(Duration::from_secs(5))
        .expect("start hung after a stop completed during startup")
        .expect("start reported an error");
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(!provider.is_running());
}

#[test]
fn worker_origin_stop_without_a_worker_reaches_stopped() {
    let bus = LoopbackBus::new();
    let (_provider, controller) = client_with_controller(&bus);
    controller.init(|_| Ok(())).expect("init should succeed");

    // No start, so nobody else will ever write the final state.
    controller.stop(StopOrigin::Worker);
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[test]
fn self_stop_from_worker_does_not_deadlock() {
    let bus = LoopbackBus::new();
    let (_provider, controller) = client_with_controller(&bus);
    controller.init(|_| Ok(())).expect("init should succeed");

    let stopper = Arc::clone(&controller);
    let done = start_detached(&controller, move || {
        thread::sleep(Duration::from_millis(30));
        stopper.stop(StopOrigin::Worker);
    });

    // The whole sequence must complete without any external stop call.
    done.recv_timeout(Duration::from_secs(5))
        .expect("self-stop deadlocked")
        .expect("start reported an error");
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[test]
fn availability_driven_subscribe_delivers_notifications() {
    let bus = LoopbackBus::new();
    let (client, controller) = client_with_controller(&bus);

    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    controller
        .init(|provider| {
            provider.register_message_handler(
                SERVICE,
                INSTANCE,
                ANY_METHOD,
                Arc::new(move |message: &Message| {
                    sink.lock().push(describe_notification(message));
                }),
            );
            Ok(())
        })
        .expect("init should succeed");
    track_availability(&controller);
    controller.provider().request_service(SERVICE, INSTANCE);

    let coordinator = SubscribeCoordinator::new(
        Arc::clone(controller.provider()),
        Arc::clone(controller.tracker()),
        [KEY],
        SubscribePlan {
            event: EVENT,
            eventgroups: BTreeSet::from([GROUP]),
        },
        ResubscribePolicy::Once,
    );
    let done = start_detached(&controller, move || coordinator.run());

    // Service comes up after the client is already waiting.
    let service = bus.attach("service");
    service.offer_event(SERVICE, INSTANCE, EVENT, &BTreeSet::from([GROUP]), &EventConfig::default());
    service.offer_service(SERVICE, INSTANCE, 1, 0);

    assert!(eventually(Duration::from_secs(2), || {
        client.subscription_count() == 1
    }));

    service.notify(SERVICE, INSTANCE, EVENT, &Payload::from_bytes(vec![0x00, 0x01, 0xff]));
    assert!(eventually(Duration::from_secs(2), || !lines.lock().is_empty()));
    assert_eq!(
        lines.lock()[0],
        "received a notification for event [1234.5678.0123] to Client/Session [0000/0000] = (3) 00 01 ff "
    );

    controller.stop(StopOrigin::External);
    done.recv_timeout(Duration::from_secs(5))
        .expect("start did not return after stop")
        .expect("start reported an error");
    assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[test]
fn ledger_correlates_response_with_recorded_request() {
    const METHOD: u16 = 0x0421;

    let bus = LoopbackBus::new();
    let service = bus.attach("service");
    let client = bus.attach("client");

    // The responder stashes the request instead of answering inline, so
    // the reply arrives only after the client has recorded the send.
    let stashed: Arc<Mutex<Option<Message>>> = Arc::new(Mutex::new(None));
    let stash = Arc::clone(&stashed);
    service.register_message_handler(
        SERVICE,
        INSTANCE,
        METHOD,
        Arc::new(move |request: &Message| {
            *stash.lock() = Some(request.clone());
        }),
    );
    service.offer_service(SERVICE, INSTANCE, 1, 0);

    let ledger = Arc::new(RequestLedger::new());
    let resolved: Arc<Mutex<Vec<(ServiceKey, u16)>>> = Arc::new(Mutex::new(Vec::new()));
    let resolver = Arc::clone(&ledger);
    let sink = Arc::clone(&resolved);
    client.register_message_handler(
        SERVICE,
        INSTANCE,
        ANY_METHOD,
        Arc::new(move |message: &Message| {
            if message.message_type == MessageType::Response {
                if let Some(pending) = resolver.resolve(message) {
                    sink.lock().push((pending.target, pending.method));
                }
            }
        }),
    );

    let mut request = build_request(
        client.as_ref(),
        KEY,
        METHOD,
        true,
        Payload::from_bytes(vec![0xaa, 0xbb]),
    );
    client.send(&mut request);
    ledger.record(&request);
    assert_eq!(ledger.len(), 1);

    let stashed_request = stashed.lock().take().expect("request reached the service");
    let mut response = service.create_response(&stashed_request);
    response.payload = Payload::from_bytes(vec![0x01]);
    service.send(&mut response);

    assert_eq!(*resolved.lock(), vec![(KEY, METHOD)]);
    assert!(ledger.is_empty());
}
