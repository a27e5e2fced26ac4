use std::time::Duration;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::RelayerError;

/// Health of an endpoint as last reported by the external prober
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Slow,
    Unhealthy,
    #[default]
    Unknown,
}

/// Static description of an endpoint, as found in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub name: String,
    /// Lower sorts first
    #[serde(default)]
    pub priority: u32,
    /// Share of traffic among active endpoints, 0-100
    #[serde(default)]
    pub weight: u32,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl EndpointConfig {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            priority: 0,
            weight: 0,
            is_active: true,
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

/// A candidate network access point and its runtime failure/health state
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: String,
    pub url: String,
    pub name: String,
    pub priority: u32,
    /// Selection weight over the current active set
    pub weight: u32,
    /// Weight from configuration, the basis for every rebalance
    pub configured_weight: u32,
    pub is_active: bool,
    /// Failures since the last success, aged out after the reset window
    pub failure_count: u32,
    pub last_failure_time: Option<Instant>,
    /// Failures since the last success, used for auto-disable
    pub consecutive_failures: u32,
    pub last_used: Option<Instant>,
    pub latency: Option<Duration>,
    pub last_health_check_time: Option<Instant>,
    pub health_status: HealthStatus,
    /// Set when policy, not configuration, deactivated the endpoint
    pub auto_disabled: bool,
}

impl From<EndpointConfig> for Endpoint {
    fn from(config: EndpointConfig) -> Self {
        Self {
            id: config.id,
            url: config.url,
            name: config.name,
            priority: config.priority,
            weight: config.weight.min(100),
            configured_weight: config.weight.min(100),
            is_active: config.is_active,
            failure_count: 0,
            last_failure_time: None,
            consecutive_failures: 0,
            last_used: None,
            latency: None,
            last_health_check_time: None,
            health_status: HealthStatus::Unknown,
            auto_disabled: false,
        }
    }
}

/// An address and its key material, held only for the duration of one operation
pub struct SigningWallet {
    pub address: String,
    keypair: Keypair,
}

impl SigningWallet {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            address: keypair.pubkey().to_string(),
            keypair,
        }
    }

    /// Build a wallet from a base58 address and a base58 64-byte secret key.
    pub fn from_base58(address: &str, private_key: &str) -> Result<Self, RelayerError> {
        let bytes = bs58::decode(private_key)
            .into_vec()
            .map_err(|e| RelayerError::Decode(format!("private key for {address}: {e}")))?;
        let keypair = Keypair::from_bytes(&bytes)
            .map_err(|e| RelayerError::Decode(format!("private key for {address}: {e}")))?;
        if keypair.pubkey().to_string() != address {
            return Err(RelayerError::Configuration(format!(
                "private key does not belong to {address}"
            )));
        }
        Ok(Self {
            address: address.to_string(),
            keypair,
        })
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }
}

impl std::fmt::Debug for SigningWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Ordered transaction blobs that must be submitted together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBundle {
    pub transactions: Vec<String>,
}

impl TransactionBundle {
    pub fn new(transactions: Vec<String>) -> Self {
        Self { transactions }
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

/// Trading operation requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Create,
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Create => write!(f, "create"),
        }
    }
}

/// Everything the UI hands over for one trade
#[derive(Debug)]
pub struct TradeRequest {
    pub action: TradeAction,
    pub wallets: Vec<SigningWallet>,
    /// Opaque operation parameters forwarded to the bundle backend
    pub config: serde_json::Value,
    pub amounts: Option<Vec<u64>>,
}

/// Outcome of submitting one bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleResult {
    pub index: usize,
    pub success: bool,
    /// Relay-assigned id on success
    pub bundle_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl BundleResult {
    pub fn succeeded(index: usize, bundle_id: String, attempts: u32) -> Self {
        Self {
            index,
            success: true,
            bundle_id: Some(bundle_id),
            attempts,
            error: None,
        }
    }

    pub fn failed(index: usize, attempts: u32, error: &RelayerError) -> Self {
        Self {
            index,
            success: false,
            bundle_id: None,
            attempts,
            error: Some(error.to_string()),
        }
    }
}

/// Operation-level summary returned to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub success: bool,
    pub total_bundles: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub per_bundle_results: Vec<BundleResult>,
    pub error: Option<String>,
}

impl OperationResult {
    pub(crate) fn from_results(
        operation_id: Uuid,
        total_bundles: usize,
        per_bundle_results: Vec<BundleResult>,
        error: Option<&RelayerError>,
    ) -> Self {
        let success_count = per_bundle_results.iter().filter(|r| r.success).count();
        let failure_count = per_bundle_results.len() - success_count;
        let critical_ok = per_bundle_results.first().is_some_and(|r| r.success);
        Self {
            operation_id,
            success: error.is_none() && critical_ok,
            total_bundles,
            success_count,
            failure_count,
            per_bundle_results,
            error: error.map(ToString::to_string),
        }
    }

    pub(crate) fn failed(operation_id: Uuid, total_bundles: usize, error: &RelayerError) -> Self {
        Self::from_results(operation_id, total_bundles, Vec::new(), Some(error))
    }

    /// Human-readable notification text for the UI.
    pub fn message(&self) -> String {
        match (&self.error, self.success) {
            (Some(e), _) => format!("Operation failed: {e}"),
            (None, true) if self.failure_count == 0 => format!(
                "Submitted {} of {} bundles",
                self.success_count, self.total_bundles
            ),
            (None, true) => format!(
                "Submitted {} of {} bundles ({} failed)",
                self.success_count, self.total_bundles, self.failure_count
            ),
            (None, false) => "Operation failed".to_string(),
        }
    }
}
