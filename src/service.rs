use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::RelayerConfig;
use crate::error::RelayerError;
use crate::health::{HealthProber, RpcHealthProber};
use crate::pipeline::BundlePipeline;
use crate::prepare::{BundleSource, HttpBundleSource, PrepareRequest};
use crate::rate_limiter::RateLimiter;
use crate::registry::EndpointRegistry;
use crate::relay::{JitoRelayClient, RelayClient};
use crate::types::{Endpoint, OperationResult, TradeRequest};

/// Entry point for the UI layer: runs trades and keeps the endpoint pool healthy
pub struct RelayerService {
    /// Configuration
    config: RelayerConfig,

    /// Endpoint pool for direct network reads
    registry: Arc<EndpointRegistry>,

    /// Bundle signing and submission
    pipeline: BundlePipeline,

    /// Backend producing bundles for a trade
    source: Arc<dyn BundleSource>,

    /// The running health monitor, if any
    monitor: Mutex<Option<HealthMonitor>>,
}

/// Handle on one spawned health-check loop
struct HealthMonitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RelayerService {
    /// Create a service with explicit collaborators.
    pub fn new(
        config: RelayerConfig,
        source: Arc<dyn BundleSource>,
        relay: Arc<dyn RelayClient>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RelayerError> {
        config.validate()?;

        let endpoints = config.endpoints.iter().cloned().map(Endpoint::from).collect();
        let registry = EndpointRegistry::new(endpoints, config.registry.clone(), clock.clone())?;
        let limiter = Arc::new(RateLimiter::new(&config.rate_limit, clock));
        let pipeline = BundlePipeline::new(relay, limiter, config.retry.clone(), config.encoding);

        Ok(Self {
            config,
            registry: Arc::new(registry),
            pipeline,
            source,
            monitor: Mutex::new(None),
        })
    }

    /// Create a service talking HTTP to the configured backend and relay.
    pub fn from_config(config: RelayerConfig) -> Result<Self, RelayerError> {
        let timeout = config.request_timeout();
        let source = HttpBundleSource::new(&config.prepare_url, timeout)?;
        let relay = JitoRelayClient::new(&config.relay_url, timeout, config.encoding)?;
        Self::new(config, Arc::new(source), Arc::new(relay), Arc::new(SystemClock))
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Prepare, sign and submit the bundles for one trade.
    ///
    /// Never returns an error: every failure is folded into the result
    /// handed back to the UI.
    #[instrument(skip_all, fields(action = %request.action, wallets = request.wallets.len()))]
    pub async fn execute_trade(
        &self,
        request: TradeRequest,
        cancel: &CancellationToken,
    ) -> OperationResult {
        let prepare = PrepareRequest {
            action: request.action,
            wallet_addresses: request.wallets.iter().map(|w| w.address.clone()).collect(),
            config: request.config,
            amounts: request.amounts,
        };

        let bundles = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RelayerError::Cancelled),
            prepared = self.source.prepare_bundles(&prepare) => prepared,
        };

        match bundles {
            Ok(bundles) => {
                debug!(bundles = bundles.len(), "Backend prepared bundles");
                self.pipeline.execute(&request.wallets, &bundles, cancel).await
            }
            Err(e) => {
                error!(%e, "Failed to prepare bundles");
                OperationResult::failed(Uuid::new_v4(), 0, &e)
            }
        }
    }

    /// Lamport balance of `address`, read through the endpoint pool.
    pub async fn get_balance(&self, address: &str) -> Result<u64, RelayerError> {
        let pubkey = Pubkey::from_str(address)
            .map_err(|e| RelayerError::Configuration(format!("invalid address {address}: {e}")))?;

        self.registry
            .call(|conn| async move {
                conn.client
                    .get_balance(&pubkey)
                    .await
                    .map_err(|e| RelayerError::Network(e.to_string()))
            })
            .await
    }

    /// Start periodic health probing with the Solana RPC prober.
    pub async fn start(&self) -> Result<(), RelayerError> {
        let prober = RpcHealthProber::new(self.config.registry.rpc_timeout());
        self.start_health_monitor(Arc::new(prober)).await
    }

    /// Start periodic health probing with a custom prober.
    pub async fn start_health_monitor(
        &self,
        prober: Arc<dyn HealthProber>,
    ) -> Result<(), RelayerError> {
        info!("Starting endpoint health monitor");

        let mut monitor = self.monitor.lock().await;
        if monitor.is_some() {
            return Err(RelayerError::Configuration("Health monitor already running".into()));
        }

        let registry = self.registry.clone();
        let interval = self.config.registry.health_check_interval().max(Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = registry.run_health_checks(prober.as_ref()) => {}
                }
                let active = registry.active_endpoints().await.len();
                debug!(active, "Health check round complete");

                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = sleep(interval) => {}
                }
            }
            info!("Endpoint health monitor stopped");
        });

        *monitor = Some(HealthMonitor { cancel, task });
        Ok(())
    }

    /// Stop the health monitor and wait for its loop to exit.
    ///
    /// A monitor started afterwards never overlaps the stopped one.
    pub async fn stop(&self) {
        let Some(monitor) = self.monitor.lock().await.take() else {
            return;
        };
        info!("Stopping endpoint health monitor");
        monitor.cancel.cancel();
        if let Err(e) = monitor.task.await {
            error!(%e, "Health monitor task failed");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.monitor.lock().await.is_some()
    }
}
