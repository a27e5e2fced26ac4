use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RelayerError;
use crate::signing::TxEncoding;
use crate::types::EndpointConfig;

/// Endpoint selection and failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Failures within the reset window after which an endpoint is skipped
    pub max_failures: u32,
    /// Idle time after which an endpoint's failure count ages out
    pub failure_reset_window_ms: u64,
    /// Consecutive failures that auto-disable an endpoint
    pub auto_disable_threshold: u32,
    /// Whether failures and unhealthy probes may deactivate endpoints
    pub auto_disable_on_unhealthy: bool,
    /// Whether a later success or healthy probe re-activates an auto-disabled endpoint
    pub auto_reenable: bool,
    /// Probe latency above which an endpoint is classified as slow
    pub slow_latency_ms: u64,
    /// Period of the background health monitor
    pub health_check_interval_ms: u64,
    /// Timeout for RPC clients handed out by the registry
    pub rpc_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            failure_reset_window_ms: 60_000,
            auto_disable_threshold: 3,
            auto_disable_on_unhealthy: true,
            auto_reenable: true,
            slow_latency_ms: 1_000,
            health_check_interval_ms: 30_000,
            rpc_timeout_ms: 10_000,
        }
    }
}

impl RegistryConfig {
    pub fn failure_reset_window(&self) -> Duration {
        Duration::from_millis(self.failure_reset_window_ms)
    }

    pub fn slow_latency(&self) -> Duration {
        Duration::from_millis(self.slow_latency_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

/// Global outbound submission cap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Submissions allowed per window
    pub max_per_window: u32,
    /// Window length
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: 2,
            window_ms: 1_000,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Retry and backoff policy for the critical bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub max_consecutive_errors: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_min: f64,
    pub jitter_max: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            max_consecutive_errors: 3,
            base_delay_ms: 200,
            multiplier: 1.5,
            jitter_min: 0.85,
            jitter_max: 1.15,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Top-level configuration for the relayer service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Candidate RPC endpoints for direct network reads
    pub endpoints: Vec<EndpointConfig>,
    pub registry: RegistryConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
    /// Block-engine proxy that accepts signed bundles
    pub relay_url: String,
    /// Backend that prepares partially-signed bundles
    pub prepare_url: String,
    /// Timeout for relay and backend HTTP calls
    pub request_timeout_ms: u64,
    /// Wire encoding of transaction blobs
    pub encoding: TxEncoding,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            registry: RegistryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            relay_url: "https://mainnet.block-engine.jito.wtf/api/v1/bundles".to_string(),
            prepare_url: "http://localhost:8080/api/bundles".to_string(),
            request_timeout_ms: 15_000,
            encoding: TxEncoding::Base58,
        }
    }
}

impl RelayerConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json_str(json: &str) -> Result<Self, RelayerError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| RelayerError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RelayerError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), RelayerError> {
        if !self.endpoints.iter().any(|e| e.is_active) {
            return Err(RelayerError::Configuration(
                "at least one active endpoint is required".into(),
            ));
        }
        if self.rate_limit.max_per_window == 0 || self.rate_limit.window_ms == 0 {
            return Err(RelayerError::Configuration(
                "rate limit cap and window must be non-zero".into(),
            ));
        }
        let retry = &self.retry;
        if retry.max_attempts == 0 || retry.max_consecutive_errors == 0 {
            return Err(RelayerError::Configuration(
                "retry limits must be non-zero".into(),
            ));
        }
        if retry.jitter_min <= 0.0 || retry.jitter_min > retry.jitter_max {
            return Err(RelayerError::Configuration(format!(
                "invalid jitter bounds [{}, {}]",
                retry.jitter_min, retry.jitter_max
            )));
        }
        if retry.multiplier < 1.0 {
            return Err(RelayerError::Configuration(
                "backoff multiplier must be at least 1.0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = RelayerConfig::default();
        assert_eq!(config.registry.max_failures, 3);
        assert_eq!(config.registry.failure_reset_window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit.max_per_window, 2);
        assert_eq!(config.rate_limit.window(), Duration::from_secs(1));
        assert_eq!(config.retry.max_attempts, 50);
        assert_eq!(config.retry.max_consecutive_errors, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_millis(200));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config = RelayerConfig::from_json_str(
            r#"{
                "endpoints": [{ "id": "a", "url": "http://a", "weight": 100 }],
                "rate_limit": { "max_per_window": 5 },
                "encoding": "base64"
            }"#,
        )
        .unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert!(config.endpoints[0].is_active);
        assert_eq!(config.rate_limit.max_per_window, 5);
        assert_eq!(config.rate_limit.window_ms, 1_000);
        assert_eq!(config.encoding, TxEncoding::Base64);
    }

    #[test]
    fn rejects_config_without_active_endpoint() {
        let err = RelayerConfig::from_json_str(
            r#"{ "endpoints": [{ "id": "a", "url": "http://a", "is_active": false }] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, RelayerError::Configuration(_)));
    }

    #[test]
    fn rejects_inverted_jitter() {
        let mut config = RelayerConfig::default();
        config.endpoints.push(EndpointConfig::new("a", "http://a"));
        config.retry.jitter_min = 1.2;
        assert!(config.validate().is_err());
    }
}
