//! Server settings

use shared::{TransportConfig, DEFAULT_PORT};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the UDP socket to
    pub host: String,
    pub port: u16,
    /// Connections beyond this are refused during the handshake
    pub max_peers: usize,
    /// Tell the remaining peers when somebody leaves so they can drop the
    /// stale entry
    pub announce_departures: bool,
    pub transport: TransportConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_peers: 32,
            announce_departures: true,
            transport: TransportConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Transport settings with the peer limit applied
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            max_peers: self.max_peers,
            ..self.transport.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 1234);
        assert_eq!(config.max_peers, 32);
        assert!(config.announce_departures);
        assert_eq!(config.bind_address(), "0.0.0.0:1234");
    }

    #[test]
    fn test_peer_limit_overrides_transport() {
        let config = ServerConfig {
            max_peers: 2,
            ..ServerConfig::default()
        };
        assert_eq!(config.transport_config().max_peers, 2);
        assert_eq!(
            config.transport_config().resend_interval,
            config.transport.resend_interval
        );
    }
}
