// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! soam-event-watch - Subscribe to an event on multiple service instances
//!
//! Runs a publisher node and a watcher node on an in-process loopback
//! bus. Two instances of the same service come up; the watcher
//! subscribes to each one exactly once as it becomes available and logs
//! every notification it receives.

use clap::Parser;
use soam::{
    describe_notification, EventConfig, LifecycleController, LoopbackBus, Message, Payload,
    Provider, RegistrationState, ResubscribePolicy, ServiceKey, StopOrigin, SubscribeCoordinator,
    SubscribePlan, ANY_METHOD, ANY_SERVICE,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

const SERVICE: u16 = 0x1234;
const INSTANCES: [u16; 2] = [0x5678, 0x6789];
const EVENT: u16 = 0x0123;
const GROUP: u16 = 0x0321;

/// Subscribe to an event on multiple service instances
#[derive(Parser, Debug)]
#[command(name = "soam-event-watch")]
#[command(version = "0.1.0")]
#[command(about = "Subscribe to an event on multiple service instances")]
struct Args {
    /// Resubscription policy after an availability flap: once, on-return
    #[arg(long, default_value = "once", value_parser = parse_policy)]
    policy: ResubscribePolicy,

    /// Publish interval of the built-in publisher in milliseconds
    #[arg(long, default_value = "1000")]
    interval: u64,
}

fn parse_policy(s: &str) -> Result<ResubscribePolicy, String> {
    match s.to_lowercase().as_str() {
        "once" => Ok(ResubscribePolicy::Once),
        "on-return" | "onreturn" => Ok(ResubscribePolicy::OnReturn),
        _ => Err(format!("Unknown policy: {s}")),
    }
}

fn keys() -> [ServiceKey; 2] {
    INSTANCES.map(|instance| ServiceKey::new(SERVICE, instance))
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let bus = LoopbackBus::new();
    let provider = bus.attach("event-watch");
    let controller = Arc::new(LifecycleController::new(provider as Arc<dyn Provider>));

    let tracker = Arc::clone(controller.tracker());
    controller.init(|provider| {
        provider.register_state_handler(Arc::new(|state| {
            let what = match state {
                RegistrationState::Registered => "registered",
                RegistrationState::Deregistered => "deregistered",
            };
            log::info!("Watcher is {what}");
        }));
        for key in keys() {
            let tracker = Arc::clone(&tracker);
            provider.register_availability_handler(
                key.service,
                key.instance,
                Arc::new(move |service, instance, available| {
                    log::info!(
                        "Service [{service:04x}.{instance:04x}] is {}.",
                        if available { "available" } else { "NOT available" }
                    );
                    tracker.set_available(ServiceKey::new(service, instance), available);
                }),
            );
            // One handler per instance, wildcarded on service and method.
            provider.register_message_handler(
                ANY_SERVICE,
                key.instance,
                ANY_METHOD,
                Arc::new(|message: &Message| {
                    log::info!("{}", describe_notification(message));
                }),
            );
        }
        Ok(())
    })?;
    for key in keys() {
        controller.provider().request_service(key.service, key.instance);
    }

    let sigint = Arc::clone(&controller);
    ctrlc::set_handler(move || sigint.stop(StopOrigin::External))?;

    let publisher = spawn_publisher(&bus, &controller, Duration::from_millis(args.interval));

    let coordinator = SubscribeCoordinator::new(
        Arc::clone(controller.provider()),
        Arc::clone(controller.tracker()),
        keys(),
        SubscribePlan {
            event: EVENT,
            eventgroups: BTreeSet::from([GROUP]),
        },
        args.policy,
    );
    controller.start(move || coordinator.run())?;

    let _ = publisher.join();
    Ok(())
}

/// Offer both instances and publish a counter payload on each interval.
fn spawn_publisher(
    bus: &LoopbackBus,
    controller: &LifecycleController,
    interval: Duration,
) -> std::thread::JoinHandle<()> {
    let provider = bus.attach("publisher");
    let token = controller.shutdown_token();
    std::thread::spawn(move || {
        let groups = BTreeSet::from([GROUP]);
        for key in keys() {
            provider.offer_event(key.service, key.instance, EVENT, &groups, &EventConfig::default());
            provider.offer_service(key.service, key.instance, 1, 0);
        }

        let mut counter: u8 = 0;
        loop {
            if token.wait_timeout(interval) {
                break;
            }
            counter = counter.wrapping_add(1);
            for key in keys() {
                provider.notify(
                    key.service,
                    key.instance,
                    EVENT,
                    &Payload::from_bytes(vec![counter]),
                );
            }
        }
        for key in keys() {
            provider.stop_offer_service(key.service, key.instance);
        }
    })
}
