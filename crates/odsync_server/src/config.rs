//! Server configuration.

use std::time::Duration;

/// Configuration for the reference server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Simulated network latency added to every request.
    pub latency: Duration,
    /// Maximum number of fields accepted in one write payload.
    pub max_payload_fields: usize,
}

impl ServerConfig {
    /// Creates a configuration with no latency.
    pub fn new() -> Self {
        Self {
            latency: Duration::ZERO,
            max_payload_fields: 64,
        }
    }

    /// Sets the simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the maximum payload field count.
    pub fn with_max_payload_fields(mut self, max: usize) -> Self {
        self.max_payload_fields = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.latency, Duration::ZERO);
        assert_eq!(config.max_payload_fields, 64);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_latency(Duration::from_millis(250))
            .with_max_payload_fields(8);

        assert_eq!(config.latency, Duration::from_millis(250));
        assert_eq!(config.max_payload_fields, 8);
    }
}
