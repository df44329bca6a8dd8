//! Client settings

use shared::TransportConfig;

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Settings with a shorter handshake deadline, for callers that would
    /// rather fail fast than wait for a slow server
    pub fn with_connect_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.transport.connect_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_connect_timeout_override() {
        let config = ClientConfig::default().with_connect_timeout(Duration::from_millis(250));
        assert_eq!(config.transport.connect_timeout, Duration::from_millis(250));
        assert_eq!(config.transport.max_peers, 32);
    }
}
