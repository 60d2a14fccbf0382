//! Configuration validation beyond what `Config::validate` already enforces
//! at deserialize time: address/port sanity for each topic's bus endpoint,
//! checked once up front so a typo surfaces before any process is spawned.

use crate::errors::ConfigError;
use crate::helpers::load_config::Config;
use std::collections::HashSet;
use std::net::TcpListener;

/// Validates every topic's `zmq_tcp_address`, when present, parses as
/// `tcp://*:<port>` and that the port is currently free to bind. IPC-backed
/// topics (no `zmq_tcp_address`) are skipped; the router binds those on
/// demand and a collision there surfaces as a `BusError` instead.
pub fn validate_addresses(config: &Config) -> Result<(), ConfigError> {
    let mut seen_ports: HashSet<u16> = HashSet::new();

    for topic in &config.embedder_model_configs {
        let Some(address) = &topic.zmq_tcp_address else {
            continue;
        };

        let port = parse_tcp_port(address).ok_or_else(|| ConfigError::InvalidAddress {
            topic: topic.target_topic.clone(),
            address: address.clone(),
        })?;

        if !seen_ports.insert(port) {
            return Err(ConfigError::PortInUse {
                topic: topic.target_topic.clone(),
                port,
            });
        }

        if TcpListener::bind(("0.0.0.0", port)).is_err() {
            return Err(ConfigError::PortInUse {
                topic: topic.target_topic.clone(),
                port,
            });
        }
    }

    Ok(())
}

fn parse_tcp_port(address: &str) -> Option<u16> {
    let rest = address.strip_prefix("tcp://*:")?;
    rest.parse::<u16>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_tcp_address() {
        assert_eq!(parse_tcp_port("tcp://*:5555"), Some(5555));
    }

    #[test]
    fn rejects_malformed_address() {
        assert_eq!(parse_tcp_port("tcp://127.0.0.1:5555"), None);
        assert_eq!(parse_tcp_port("not-an-address"), None);
    }
}
