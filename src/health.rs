//! Health-check policy for the endpoint registry.
//!
//! The disable/re-enable rules live in [`process_health_checks`], a pure
//! function over endpoint snapshots. Probing is done separately by a
//! [`HealthProber`], whose measurements are folded in by the registry.

use std::time::Duration;

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::types::{Endpoint, HealthStatus};

/// One measurement produced by an external prober
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbe {
    pub endpoint_id: String,
    pub reachable: bool,
    pub latency: Duration,
}

impl HealthStatus {
    /// Map a probe measurement onto a health status.
    pub fn classify(reachable: bool, latency: Duration, slow_threshold: Duration) -> Self {
        if !reachable {
            Self::Unhealthy
        } else if latency > slow_threshold {
            Self::Slow
        } else {
            Self::Healthy
        }
    }
}

/// Auto-disable / auto-re-enable switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub auto_disable_on_unhealthy: bool,
    pub auto_reenable: bool,
}

impl From<&RegistryConfig> for HealthPolicy {
    fn from(config: &RegistryConfig) -> Self {
        Self {
            auto_disable_on_unhealthy: config.auto_disable_on_unhealthy,
            auto_reenable: config.auto_reenable,
        }
    }
}

/// Record a probe measurement on the matching endpoint.
pub fn apply_probe(
    endpoint: &mut Endpoint,
    probe: &HealthProbe,
    slow_threshold: Duration,
    now: Instant,
) {
    endpoint.latency = Some(probe.latency);
    endpoint.last_health_check_time = Some(now);
    endpoint.health_status = HealthStatus::classify(probe.reachable, probe.latency, slow_threshold);
}

/// Apply the auto-disable and auto-re-enable policy to a snapshot.
///
/// Performs no I/O: `health_status` must already hold the prober's verdict.
/// The returned snapshot always has at least one active endpoint.
pub fn process_health_checks(endpoints: &[Endpoint], policy: &HealthPolicy) -> Vec<Endpoint> {
    let mut updated = endpoints.to_vec();

    for endpoint in updated.iter_mut() {
        match endpoint.health_status {
            HealthStatus::Unhealthy => {
                if endpoint.is_active && policy.auto_disable_on_unhealthy {
                    warn!(endpoint = %endpoint.id, "Auto-disabling unhealthy endpoint");
                    endpoint.is_active = false;
                    endpoint.auto_disabled = true;
                }
            }
            HealthStatus::Healthy | HealthStatus::Slow => {
                if endpoint.auto_disabled && policy.auto_reenable {
                    info!(endpoint = %endpoint.id, "Re-enabling recovered endpoint");
                    endpoint.is_active = true;
                    endpoint.auto_disabled = false;
                    endpoint.consecutive_failures = 0;
                }
            }
            HealthStatus::Unknown => {}
        }
    }

    ensure_one_active(&mut updated);
    updated
}

/// Re-activate the least-failed endpoint if none is active.
///
/// Returns the index of the endpoint that was re-activated, if any.
pub fn ensure_one_active(endpoints: &mut [Endpoint]) -> Option<usize> {
    if endpoints.is_empty() || endpoints.iter().any(|e| e.is_active) {
        return None;
    }

    let (idx, _) = endpoints.iter().enumerate().min_by_key(|(_, e)| {
        (e.consecutive_failures, e.failure_count, e.priority)
    })?;

    let endpoint = &mut endpoints[idx];
    warn!(endpoint = %endpoint.id, "No active endpoints left, keeping least-failed endpoint active");
    endpoint.is_active = true;
    endpoint.auto_disabled = false;
    Some(idx)
}

/// Rescale active weights so they sum to 100.
///
/// Inactive endpoints get weight 0. An active endpoint without a weight
/// next to weighted ones takes their mean, so it stays selectable. An
/// active set whose weights are all zero is left alone so selection falls
/// back to round-robin.
pub fn normalize_weights(endpoints: &mut [Endpoint]) {
    for endpoint in endpoints.iter_mut().filter(|e| !e.is_active) {
        endpoint.weight = 0;
    }

    let weighted: Vec<u64> = endpoints
        .iter()
        .filter(|e| e.is_active && e.weight > 0)
        .map(|e| e.weight as u64)
        .collect();
    if weighted.is_empty() {
        return;
    }

    let mean = (weighted.iter().sum::<u64>() / weighted.len() as u64).max(1) as u32;
    for endpoint in endpoints.iter_mut().filter(|e| e.is_active && e.weight == 0) {
        endpoint.weight = mean;
    }

    let total: u64 = endpoints
        .iter()
        .filter(|e| e.is_active)
        .map(|e| e.weight as u64)
        .sum();

    let mut assigned = 0u32;
    let mut last_active = None;
    for (idx, endpoint) in endpoints.iter_mut().enumerate() {
        if !endpoint.is_active {
            continue;
        }
        let scaled = (endpoint.weight as u64 * 100 / total) as u32;
        endpoint.weight = scaled;
        assigned += scaled;
        last_active = Some(idx);
    }
    // integer division leaves a remainder, give it to the last active endpoint
    if let Some(idx) = last_active {
        endpoints[idx].weight += 100 - assigned;
    }
}

/// Recompute selection weights from configured weights over the active set.
pub fn rebalance_weights(endpoints: &mut [Endpoint]) {
    for endpoint in endpoints.iter_mut() {
        endpoint.weight = endpoint.configured_weight;
    }
    normalize_weights(endpoints);
}

/// Measures endpoint health. Implementations do the I/O only.
#[async_trait]
pub trait HealthProber: Send + Sync {
    async fn probe(&self, endpoint: &Endpoint) -> HealthProbe;
}

/// Probes endpoints with the Solana `getHealth` RPC call
#[derive(Debug, Clone)]
pub struct RpcHealthProber {
    timeout: Duration,
}

impl RpcHealthProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProber for RpcHealthProber {
    async fn probe(&self, endpoint: &Endpoint) -> HealthProbe {
        let client = RpcClient::new_with_timeout(endpoint.url.clone(), self.timeout);
        let started = Instant::now();
        let result = client.get_health().await;
        let latency = started.elapsed();

        if let Err(e) = &result {
            debug!(endpoint = %endpoint.id, %e, "Health probe failed");
        }

        HealthProbe {
            endpoint_id: endpoint.id.clone(),
            reachable: result.is_ok(),
            latency,
        }
    }
}
