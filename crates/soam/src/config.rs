// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport the client requests from the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Reliable, connection-oriented transport.
    #[default]
    Tcp,
    /// Best-effort datagram transport.
    Udp,
}

impl TransportMode {
    /// Whether requests over this transport are marked reliable.
    #[must_use]
    pub fn is_reliable(self) -> bool {
        matches!(self, TransportMode::Tcp)
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportMode::Tcp => "TCP",
            TransportMode::Udp => "UDP",
        })
    }
}

impl FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(TransportMode::Tcp),
            "udp" => Ok(TransportMode::Udp),
            _ => Err(format!("Unknown transport: {s}")),
        }
    }
}

/// Configuration of a cyclic request client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Transport selection (default TCP).
    #[serde(default)]
    pub transport: TransportMode,

    /// Request cycle in milliseconds (default 1000).
    #[serde(default = "default_cycle_ms")]
    pub cycle_ms: u64,
}

fn default_cycle_ms() -> u64 {
    1000
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            cycle_ms: default_cycle_ms(),
        }
    }
}

impl ClientConfig {
    /// The request cycle as a [`Duration`].
    #[must_use]
    pub fn cycle(&self) -> Duration {
        Duration::from_millis(self.cycle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_tcp_and_one_second() {
        let config = ClientConfig::default();
        assert_eq!(config.transport, TransportMode::Tcp);
        assert_eq!(config.cycle_ms, 1000);
        assert_eq!(config.cycle(), Duration::from_millis(1000));
    }

    #[test]
    fn transport_from_str() {
        assert_eq!("tcp".parse::<TransportMode>(), Ok(TransportMode::Tcp));
        assert_eq!("UDP".parse::<TransportMode>(), Ok(TransportMode::Udp));
        assert!("sctp".parse::<TransportMode>().is_err());
    }

    #[test]
    fn udp_is_not_reliable() {
        assert!(TransportMode::Tcp.is_reliable());
        assert!(!TransportMode::Udp.is_reliable());
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let config: ClientConfig = serde_json::from_str("{}").expect("parse empty config");
        assert_eq!(config, ClientConfig::default());

        let config: ClientConfig =
            serde_json::from_str(r#"{"transport":"udp","cycle_ms":250}"#).expect("parse config");
        assert_eq!(config.transport, TransportMode::Udp);
        assert_eq!(config.cycle_ms, 250);
    }
}
