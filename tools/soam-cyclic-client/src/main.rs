// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! soam-cyclic-client - Send a request to a service on a fixed cycle
//!
//! Runs a responder node and a client node on an in-process loopback
//! bus. The client sends one request per cycle while the service is
//! available and logs every response with its Client/Session pair.

use clap::Parser;
use soam::{
    describe_response, ClientConfig, CyclicRequester, LifecycleController, LoopbackBus, Message,
    MessageType, Payload, Provider, RegistrationState, ServiceKey, StopOrigin, TransportMode,
    ANY_METHOD,
};
use std::sync::Arc;

const SERVICE: u16 = 0x1234;
const INSTANCE: u16 = 0x5678;
const METHOD: u16 = 0x0421;

/// Send a request to a service on a fixed cycle
#[derive(Parser, Debug)]
#[command(name = "soam-cyclic-client")]
#[command(version = "0.1.0")]
#[command(about = "Send a request to a service on a fixed cycle")]
struct Args {
    /// Use the reliable TCP transport (default)
    #[arg(long, overrides_with = "udp")]
    tcp: bool,

    /// Use the best-effort UDP transport
    #[arg(long, overrides_with = "tcp")]
    udp: bool,

    /// Request cycle in milliseconds
    #[arg(long, default_value = "1000")]
    cycle: u64,

    /// Request payload size in bytes
    #[arg(long, default_value = "10")]
    payload_size: usize,
}

impl Args {
    fn to_config(&self) -> ClientConfig {
        ClientConfig {
            transport: if self.udp {
                TransportMode::Udp
            } else {
                TransportMode::Tcp
            },
            cycle_ms: self.cycle,
        }
    }
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
    let config = args.to_config();
    log::info!(
        "Client settings [protocol={}:cycle={}]",
        config.transport,
        config.cycle_ms
    );

    let bus = LoopbackBus::new();
    attach_responder(&bus);

    let provider = bus.attach("cyclic-client");
    let controller = Arc::new(LifecycleController::new(provider as Arc<dyn Provider>));

    let tracker = Arc::clone(controller.tracker());
    controller.init(|provider| {
        provider.register_state_handler(Arc::new(|state| {
            let what = match state {
                RegistrationState::Registered => "registered",
                RegistrationState::Deregistered => "deregistered",
            };
            log::info!("Client is {what}");
        }));
        provider.register_availability_handler(
            SERVICE,
            INSTANCE,
            Arc::new(move |service, instance, available| {
                log::info!(
                    "Service [{service:04x}.{instance:04x}] is {}.",
                    if available { "available" } else { "NOT available" }
                );
                tracker.set_available(ServiceKey::new(service, instance), available);
            }),
        );
        provider.register_message_handler(
            SERVICE,
            INSTANCE,
            ANY_METHOD,
            Arc::new(|message: &Message| {
                if message.message_type == MessageType::Response {
                    log::info!("{}", describe_response(message));
                }
            }),
        );
        Ok(())
    })?;
    controller.provider().request_service(SERVICE, INSTANCE);

    let sigint = Arc::clone(&controller);
    ctrlc::set_handler(move || sigint.stop(StopOrigin::External))?;

    let payload: Vec<u8> = (0..args.payload_size).map(|i| (i % 256) as u8).collect();
    let requester = CyclicRequester::new(
        Arc::clone(controller.provider()),
        Arc::clone(controller.tracker()),
        controller.shutdown_token(),
        ServiceKey::new(SERVICE, INSTANCE),
        METHOD,
        config.transport.is_reliable(),
        config.cycle(),
        Payload::from_bytes(payload),
    );
    controller.start(move || requester.run())?;
    Ok(())
}

/// Offer the sample service and answer every request with 4 bytes.
fn attach_responder(bus: &LoopbackBus) {
    let provider = bus.attach("service");
    let responder = Arc::clone(&provider);
    provider.register_message_handler(
        SERVICE,
        INSTANCE,
        METHOD,
        Arc::new(move |request: &Message| {
            log::info!(
                "Received a message with Client/Session [{:04x}/{:04x}]",
                request.client,
                request.session
            );
            let mut response = responder.create_response(request);
            response.payload = Payload::from_bytes(vec![0x01, 0x02, 0x03, 0x04]);
            responder.send(&mut response);
        }),
    );
    provider.offer_service(SERVICE, INSTANCE, 1, 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_tcp_and_one_second() {
        let args = Args::try_parse_from(["soam-cyclic-client"]).expect("parse defaults");
        let config = args.to_config();
        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.cycle_ms, 1000);
        assert_eq!(args.payload_size, 10);
    }

    #[test]
    fn udp_flag_selects_udp() {
        let args = Args::try_parse_from(["soam-cyclic-client", "--udp", "--cycle", "250"])
            .expect("parse udp");
        let config = args.to_config();
        assert_eq!(config.transport, TransportMode::Udp);
        assert_eq!(config.cycle_ms, 250);
    }

    #[test]
    fn last_transport_flag_wins() {
        let args = Args::try_parse_from(["soam-cyclic-client", "--udp", "--tcp"])
            .expect("parse tcp last");
        assert_eq!(args.to_config().transport, TransportMode::Tcp);

        let args = Args::try_parse_from(["soam-cyclic-client", "--tcp", "--udp"])
            .expect("parse udp last");
        assert_eq!(args.to_config().transport, TransportMode::Udp);
    }

    #[test]
    fn malformed_cycle_is_rejected() {
        assert!(Args::try_parse_from(["soam-cyclic-client", "--cycle", "fast"]).is_err());
    }
}
