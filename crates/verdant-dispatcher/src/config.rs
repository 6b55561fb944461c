//! Configuration types for the dispatcher service.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;

use verdant_store::BucketConfig;
use verdant_telemetry::RecorderConfig;

/// Dispatcher service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// HTTP API configuration.
    pub api: ApiConfig,
    /// Configuration bucket holding schedules.
    pub bucket: BucketConfig,
    /// Delayed-task queue service.
    pub queue: QueueConfig,
    /// Forwarding behaviour.
    pub forward: ForwardConfig,
    /// In-memory schedule cache.
    pub cache: CacheConfig,
    /// Telemetry recorder.
    pub telemetry: RecorderConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8091),
        }
    }
}

/// Delayed-task queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue service endpoint.
    pub base_url: String,
    /// Auth token.
    pub token: Option<String>,
    /// Per-call deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8300".to_owned(),
            token: None,
            timeout_secs: 30,
        }
    }
}

/// Forwarding behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Per-forward deadline in seconds.
    pub timeout_secs: u64,
    /// Idempotency window for repeated request ids, in hours.
    pub idempotency_window_hours: i64,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            idempotency_window_hours: 24,
        }
    }
}

/// Schedule cache configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Schedule cache TTL in seconds. Stale reads within the TTL are
    /// tolerated; the bucket stays authoritative.
    pub schedule_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            schedule_ttl_secs: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.api.listen_addr.port(), 8091);
        assert_eq!(config.cache.schedule_ttl_secs, 60);
        assert_eq!(config.forward.idempotency_window_hours, 24);
    }
}
