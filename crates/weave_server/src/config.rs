//! Configuration for the sync server.

use std::time::Duration;
use uuid::Uuid;

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket bind address.
    pub bind_addr: String,
    /// Identity of this process in a fleet, used for relay origin tags.
    pub host_id: String,
    /// Maximum rows per batch pushed to a consumer.
    pub batch_limit: usize,
    /// Maximum mutations accepted per submission; the remainder of an
    /// oversized batch is refused as retriable.
    pub max_mutation_batch: usize,
    /// Interval between server heartbeat frames.
    pub heartbeat_interval: Duration,
}

impl ServerConfig {
    /// Creates a configuration with defaults for everything but the bind
    /// address.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            host_id: Uuid::new_v4().to_string(),
            batch_limit: 20,
            max_mutation_batch: 100,
            heartbeat_interval: Duration::from_secs(30),
        }
    }

    /// Sets the host id.
    pub fn with_host_id(mut self, host_id: impl Into<String>) -> Self {
        self.host_id = host_id.into();
        self
    }

    /// Sets the batch limit.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    /// Sets the maximum mutation batch size.
    pub fn with_max_mutation_batch(mut self, limit: usize) -> Self {
        self.max_mutation_batch = limit;
        self
    }

    /// Sets the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new("127.0.0.1:9550")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000")
            .with_host_id("host-a")
            .with_batch_limit(5)
            .with_heartbeat_interval(Duration::from_secs(10));

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.host_id, "host-a");
        assert_eq!(config.batch_limit, 5);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn default_batch_limit_is_twenty() {
        assert_eq!(ServerConfig::default().batch_limit, 20);
    }
}
