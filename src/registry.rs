use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use solana_client::nonblocking::rpc_client::RpcClient;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::clock::Clock;
use crate::config::RegistryConfig;
use crate::error::RelayerError;
use crate::health::{
    HealthPolicy, HealthProbe, HealthProber, apply_probe, ensure_one_active,
    process_health_checks, rebalance_weights,
};
use crate::types::Endpoint;

/// Mutable registry state, guarded as a unit
#[derive(Debug)]
struct RegistryState {
    /// All endpoints, sorted by (priority, failure_count) at construction
    endpoints: Vec<Endpoint>,
    /// Round-robin cursor used when no weights are set
    cursor: usize,
}

/// A selected endpoint paired with an RPC client for it
#[derive(Clone)]
pub struct EndpointConnection {
    pub endpoint: Endpoint,
    pub client: Arc<RpcClient>,
}

/// Weighted, failure-aware endpoint selection with auto-disable
pub struct EndpointRegistry {
    state: RwLock<RegistryState>,
    /// RPC clients, one per endpoint id
    clients: RwLock<HashMap<String, Arc<RpcClient>>>,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl EndpointRegistry {
    /// Create a registry from the full endpoint list.
    ///
    /// Fails only when no endpoint is active.
    pub fn new(
        endpoints: Vec<Endpoint>,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RelayerError> {
        if !endpoints.iter().any(|e| e.is_active) {
            return Err(RelayerError::Configuration(
                "no active endpoints configured".into(),
            ));
        }

        let mut endpoints = endpoints;
        endpoints.sort_by_key(|e| (!e.is_active, e.priority, e.failure_count));
        rebalance_weights(&mut endpoints);

        info!(
            total = endpoints.len(),
            active = endpoints.iter().filter(|e| e.is_active).count(),
            "Endpoint registry initialised"
        );

        Ok(Self {
            state: RwLock::new(RegistryState {
                endpoints,
                cursor: 0,
            }),
            clients: RwLock::new(HashMap::new()),
            config,
            clock,
        })
    }

    /// Pick an endpoint for the next request.
    ///
    /// Never fails: if every active endpoint has hit `max_failures`, all
    /// failure counters are reset and selection runs over the full active set.
    pub async fn select_endpoint(&self) -> Endpoint {
        self.select_endpoint_excluding(&[]).await
    }

    /// Pick an endpoint, passing over the ids in `exclude`.
    ///
    /// Excluded endpoints are picked only once every active endpoint is
    /// excluded. Non-excluded endpoints past `max_failures` are preferred
    /// over excluded ones.
    pub async fn select_endpoint_excluding(&self, exclude: &[String]) -> Endpoint {
        let now = self.clock.now();
        let reset_window = self.config.failure_reset_window();
        let mut state = self.state.write().await;

        for endpoint in state.endpoints.iter_mut() {
            let aged_out = endpoint
                .last_failure_time
                .is_some_and(|t| now.saturating_duration_since(t) > reset_window);
            if endpoint.failure_count > 0 && aged_out {
                debug!(endpoint = %endpoint.id, "Failure count aged out");
                endpoint.failure_count = 0;
            }
        }

        // selection must always have something to pick from
        if ensure_one_active(&mut state.endpoints).is_some() {
            rebalance_weights(&mut state.endpoints);
        }

        let max_failures = self.config.max_failures;
        let fresh = |e: &Endpoint| e.is_active && e.failure_count < max_failures;

        if !state.endpoints.iter().any(|e| fresh(e)) {
            warn!("All endpoints exhausted, resetting failure counters");
            for endpoint in state.endpoints.iter_mut() {
                endpoint.failure_count = 0;
            }
        }

        let excluded = |e: &Endpoint| exclude.iter().any(|id| *id == e.id);
        let indices = |keep: &dyn Fn(&Endpoint) -> bool| -> Vec<usize> {
            state
                .endpoints
                .iter()
                .enumerate()
                .filter(|(_, e)| keep(e))
                .map(|(i, _)| i)
                .collect()
        };

        let mut candidates = indices(&|e| fresh(e) && !excluded(e));
        if candidates.is_empty() {
            candidates = indices(&|e| e.is_active && !excluded(e));
        }
        if candidates.is_empty() {
            candidates = indices(&fresh);
        }

        let chosen = Self::pick(&mut *state, &candidates);
        state.endpoints[chosen].clone()
    }

    /// Weighted random pick over `candidates`, round-robin when weights are unset.
    fn pick(state: &mut RegistryState, candidates: &[usize]) -> usize {
        let total: u64 = candidates
            .iter()
            .map(|&i| state.endpoints[i].weight as u64)
            .sum();

        if total == 0 {
            let chosen = candidates[state.cursor % candidates.len()];
            state.cursor = state.cursor.wrapping_add(1);
            return chosen;
        }

        let mut remaining = rand::thread_rng().gen_range(0.0..total as f64);
        for &i in candidates {
            remaining -= state.endpoints[i].weight as f64;
            if remaining <= 0.0 {
                return i;
            }
        }
        candidates[candidates.len() - 1]
    }

    /// Record a successful use of an endpoint.
    pub async fn report_success(&self, endpoint_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.id == endpoint_id) else {
            return;
        };

        endpoint.failure_count = 0;
        endpoint.consecutive_failures = 0;
        endpoint.last_used = Some(now);

        if endpoint.auto_disabled && self.config.auto_reenable {
            info!(endpoint = %endpoint.id, "Re-enabling endpoint after successful use");
            endpoint.is_active = true;
            endpoint.auto_disabled = false;
            rebalance_weights(&mut state.endpoints);
        }
    }

    /// Record a failed use of an endpoint, auto-disabling it past the threshold.
    pub async fn report_failure(&self, endpoint_id: &str) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.id == endpoint_id) else {
            return;
        };

        endpoint.failure_count += 1;
        endpoint.consecutive_failures += 1;
        endpoint.last_failure_time = Some(now);
        debug!(
            endpoint = %endpoint.id,
            failures = endpoint.failure_count,
            consecutive = endpoint.consecutive_failures,
            "Endpoint failure recorded"
        );

        if endpoint.is_active
            && self.config.auto_disable_on_unhealthy
            && endpoint.consecutive_failures >= self.config.auto_disable_threshold
        {
            warn!(
                endpoint = %endpoint.id,
                consecutive = endpoint.consecutive_failures,
                "Auto-disabling endpoint"
            );
            endpoint.is_active = false;
            endpoint.auto_disabled = true;
            ensure_one_active(&mut state.endpoints);
            rebalance_weights(&mut state.endpoints);
        }
    }

    /// Fold probe measurements into the registry and apply the health policy.
    pub async fn apply_health_checks(&self, probes: &[HealthProbe]) {
        let now = self.clock.now();
        let slow = self.config.slow_latency();
        let mut state = self.state.write().await;

        for probe in probes {
            if let Some(endpoint) = state.endpoints.iter_mut().find(|e| e.id == probe.endpoint_id) {
                apply_probe(endpoint, probe, slow, now);
            }
        }

        state.endpoints = process_health_checks(&state.endpoints, &HealthPolicy::from(&self.config));
        rebalance_weights(&mut state.endpoints);
    }

    /// Probe every endpoint and apply the results.
    #[instrument(skip_all)]
    pub async fn run_health_checks(&self, prober: &dyn HealthProber) {
        let endpoints = self.snapshot().await;
        let mut probes = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            probes.push(prober.probe(endpoint).await);
        }
        self.apply_health_checks(&probes).await;
    }

    /// Copy of every endpoint, active or not.
    pub async fn snapshot(&self) -> Vec<Endpoint> {
        self.state.read().await.endpoints.clone()
    }

    pub async fn active_endpoints(&self) -> Vec<Endpoint> {
        self.state
            .read()
            .await
            .endpoints
            .iter()
            .filter(|e| e.is_active)
            .cloned()
            .collect()
    }

    /// Select an endpoint and hand out an RPC client for it.
    pub async fn connection(&self) -> EndpointConnection {
        self.connection_excluding(&[]).await
    }

    /// Like [`connection`](Self::connection), passing over the ids in `exclude`.
    pub async fn connection_excluding(&self, exclude: &[String]) -> EndpointConnection {
        let endpoint = self.select_endpoint_excluding(exclude).await;

        if let Some(client) = self.clients.read().await.get(&endpoint.id) {
            return EndpointConnection {
                endpoint,
                client: client.clone(),
            };
        }

        let mut clients = self.clients.write().await;
        let client = clients
            .entry(endpoint.id.clone())
            .or_insert_with(|| {
                Arc::new(RpcClient::new_with_timeout(
                    endpoint.url.clone(),
                    self.config.rpc_timeout(),
                ))
            })
            .clone();
        EndpointConnection { endpoint, client }
    }

    /// Run `f` against selected endpoints until one succeeds.
    ///
    /// Tries at most once per active endpoint, never returning to an
    /// endpoint that already failed while an untried one is active. Each
    /// outcome is reported to the registry.
    pub async fn call<T, F, Fut>(&self, mut f: F) -> Result<T, RelayerError>
    where
        F: FnMut(EndpointConnection) -> Fut,
        Fut: Future<Output = Result<T, RelayerError>>,
    {
        let attempts = self.active_endpoints().await.len().max(1) as u32;
        let mut last_error = None;
        let mut tried: Vec<String> = Vec::with_capacity(attempts as usize);

        for _ in 0..attempts {
            let connection = self.connection_excluding(&tried).await;
            let endpoint_id = connection.endpoint.id.clone();
            match f(connection).await {
                Ok(value) => {
                    self.report_success(&endpoint_id).await;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint_id, %e, "Endpoint call failed, failing over");
                    self.report_failure(&endpoint_id).await;
                    tried.push(endpoint_id);
                    last_error = Some(e);
                }
            }
        }

        Err(RelayerError::Exhausted {
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{EndpointConfig, HealthStatus};
    use std::time::Duration;

    fn registry_with(
        configs: Vec<EndpointConfig>,
        config: RegistryConfig,
    ) -> (EndpointRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let endpoints = configs.into_iter().map(Endpoint::from).collect();
        let registry = EndpointRegistry::new(endpoints, config, clock.clone()).unwrap();
        (registry, clock)
    }

    #[test]
    fn construction_requires_an_active_endpoint() {
        let endpoints = vec![Endpoint::from(EndpointConfig::new("a", "http://a").inactive())];
        let result = EndpointRegistry::new(
            endpoints,
            RegistryConfig::default(),
            Arc::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(RelayerError::Configuration(_))));
    }

    #[tokio::test]
    async fn construction_orders_by_priority() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("low", "http://low").with_priority(5),
                EndpointConfig::new("off", "http://off").inactive(),
                EndpointConfig::new("high", "http://high").with_priority(1),
            ],
            RegistryConfig::default(),
        );
        let ids: Vec<_> = registry.snapshot().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["high", "low", "off"]);
    }

    #[tokio::test]
    async fn weighted_selection_tracks_weights() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a").with_weight(70),
                EndpointConfig::new("b", "http://b").with_weight(30),
            ],
            RegistryConfig::default(),
        );

        let mut hits_a = 0;
        let draws = 10_000;
        for _ in 0..draws {
            if registry.select_endpoint().await.id == "a" {
                hits_a += 1;
            }
        }
        let ratio = hits_a as f64 / draws as f64;
        assert!((ratio - 0.70).abs() < 0.03, "ratio was {ratio}");
    }

    #[tokio::test]
    async fn unweighted_selection_round_robins() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a"),
                EndpointConfig::new("b", "http://b"),
            ],
            RegistryConfig::default(),
        );
        let first = registry.select_endpoint().await.id;
        let second = registry.select_endpoint().await.id;
        let third = registry.select_endpoint().await.id;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn failing_endpoint_is_skipped_until_window_passes() {
        let config = RegistryConfig {
            auto_disable_on_unhealthy: false,
            ..RegistryConfig::default()
        };
        let (registry, clock) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a").with_weight(50),
                EndpointConfig::new("b", "http://b").with_weight(50),
            ],
            config,
        );
        for _ in 0..3 {
            registry.report_failure("a").await;
        }
        for _ in 0..50 {
            assert_eq!(registry.select_endpoint().await.id, "b");
        }

        clock.advance(Duration::from_secs(61));
        let snapshot_before = registry.snapshot().await;
        assert_eq!(snapshot_before.iter().find(|e| e.id == "a").unwrap().failure_count, 3);
        registry.select_endpoint().await;
        let a = registry.snapshot().await.into_iter().find(|e| e.id == "a").unwrap();
        assert_eq!(a.failure_count, 0);
        // consecutive failures only clear on success
        assert_eq!(a.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn exhausted_pool_still_returns_an_endpoint() {
        let config = RegistryConfig {
            auto_disable_on_unhealthy: false,
            ..RegistryConfig::default()
        };
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a"),
                EndpointConfig::new("b", "http://b"),
            ],
            config,
        );
        for id in ["a", "b"] {
            for _ in 0..5 {
                registry.report_failure(id).await;
            }
        }
        let chosen = registry.select_endpoint().await;
        assert!(chosen.id == "a" || chosen.id == "b");
        assert!(registry.snapshot().await.iter().all(|e| e.failure_count == 0));
    }

    #[tokio::test]
    async fn consecutive_failures_auto_disable_then_success_reenables() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a"),
                EndpointConfig::new("b", "http://b"),
            ],
            RegistryConfig::default(),
        );
        for _ in 0..3 {
            registry.report_failure("a").await;
        }
        let active: Vec<_> = registry.active_endpoints().await.into_iter().map(|e| e.id).collect();
        assert_eq!(active, vec!["b"]);

        registry.report_success("a").await;
        let a = registry.snapshot().await.into_iter().find(|e| e.id == "a").unwrap();
        assert!(a.is_active);
        assert!(!a.auto_disabled);
        assert_eq!(a.consecutive_failures, 0);
        assert!(a.last_used.is_some());
    }

    #[tokio::test]
    async fn last_active_endpoint_is_never_disabled() {
        let (registry, _) = registry_with(
            vec![EndpointConfig::new("only", "http://only")],
            RegistryConfig::default(),
        );
        for _ in 0..10 {
            registry.report_failure("only").await;
        }
        assert_eq!(registry.active_endpoints().await.len(), 1);
        assert_eq!(registry.select_endpoint().await.id, "only");
    }

    #[tokio::test]
    async fn health_checks_disable_and_recover() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a"),
                EndpointConfig::new("b", "http://b"),
            ],
            RegistryConfig::default(),
        );
        registry
            .apply_health_checks(&[HealthProbe {
                endpoint_id: "a".into(),
                reachable: false,
                latency: Duration::from_millis(5),
            }])
            .await;
        let a = registry.snapshot().await.into_iter().find(|e| e.id == "a").unwrap();
        assert_eq!(a.health_status, HealthStatus::Unhealthy);
        assert!(!a.is_active);

        registry
            .apply_health_checks(&[HealthProbe {
                endpoint_id: "a".into(),
                reachable: true,
                latency: Duration::from_millis(1500),
            }])
            .await;
        let a = registry.snapshot().await.into_iter().find(|e| e.id == "a").unwrap();
        assert_eq!(a.health_status, HealthStatus::Slow);
        assert!(a.is_active);
        assert_eq!(a.latency, Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn call_fails_over_to_next_endpoint() {
        let config = RegistryConfig {
            auto_disable_on_unhealthy: false,
            ..RegistryConfig::default()
        };
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a"),
                EndpointConfig::new("b", "http://b"),
            ],
            config,
        );
        let value = registry
            .call(|conn| async move {
                if conn.endpoint.id == "a" {
                    Err(RelayerError::Network("refused".into()))
                } else {
                    Ok(conn.endpoint.id)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, "b");
    }

    #[tokio::test]
    async fn call_reports_exhaustion() {
        let (registry, _) = registry_with(
            vec![EndpointConfig::new("a", "http://a")],
            RegistryConfig::default(),
        );
        let err = registry
            .call(|_| async { Err::<(), _>(RelayerError::Network("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, RelayerError::Exhausted { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn weighted_call_moves_past_the_failed_endpoint() {
        for _ in 0..200 {
            let (registry, _) = registry_with(
                vec![
                    EndpointConfig::new("a", "http://a").with_weight(70),
                    EndpointConfig::new("b", "http://b").with_weight(30),
                ],
                RegistryConfig::default(),
            );
            let value = registry
                .call(|conn| async move {
                    if conn.endpoint.id == "a" {
                        Err(RelayerError::Network("refused".into()))
                    } else {
                        Ok(conn.endpoint.id)
                    }
                })
                .await
                .unwrap();
            assert_eq!(value, "b");
        }
    }

    #[tokio::test]
    async fn excluded_endpoints_are_passed_over() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a").with_weight(99),
                EndpointConfig::new("b", "http://b").with_weight(1),
            ],
            RegistryConfig::default(),
        );
        let exclude = vec!["a".to_string()];
        for _ in 0..50 {
            assert_eq!(registry.select_endpoint_excluding(&exclude).await.id, "b");
        }

        // everything excluded falls back to the whole active set
        let all = vec!["a".to_string(), "b".to_string()];
        let chosen = registry.select_endpoint_excluding(&all).await;
        assert!(chosen.id == "a" || chosen.id == "b");
    }

    #[tokio::test]
    async fn weights_follow_the_active_set() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a").with_weight(70),
                EndpointConfig::new("b", "http://b").with_weight(30),
            ],
            RegistryConfig::default(),
        );
        for _ in 0..3 {
            registry.report_failure("a").await;
        }
        let weights: Vec<_> = registry.snapshot().await.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![0, 100]);

        registry.report_success("a").await;
        let weights: Vec<_> = registry.snapshot().await.iter().map(|e| e.weight).collect();
        assert_eq!(weights, vec![70, 30]);
    }

    #[tokio::test]
    async fn revived_unweighted_endpoint_stays_selectable() {
        let (registry, _) = registry_with(
            vec![
                EndpointConfig::new("a", "http://a").with_weight(80),
                EndpointConfig::new("b", "http://b").inactive(),
            ],
            RegistryConfig::default(),
        );
        for _ in 0..3 {
            registry.report_failure("a").await;
        }
        // "a" is disabled and the configured-off "b" is the survivor
        let active: Vec<_> = registry.active_endpoints().await.into_iter().map(|e| e.id).collect();
        assert_eq!(active, vec!["b"]);

        registry.report_success("a").await;
        let snapshot = registry.snapshot().await;
        assert!(snapshot.iter().all(|e| e.is_active));
        assert!(snapshot.iter().all(|e| e.weight > 0));
        assert_eq!(snapshot.iter().map(|e| e.weight).sum::<u32>(), 100);
    }
}
