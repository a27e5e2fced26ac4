//! Boundary with the backend that prepares bundles for a trade.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::RelayerError;
use crate::types::{TradeAction, TransactionBundle};

/// Request body sent to the bundle backend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareRequest {
    pub action: TradeAction,
    pub wallet_addresses: Vec<String>,
    pub config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amounts: Option<Vec<u64>>,
}

/// Produces partially signed bundles for an operation
#[async_trait]
pub trait BundleSource: Send + Sync {
    async fn prepare_bundles(
        &self,
        request: &PrepareRequest,
    ) -> Result<Vec<TransactionBundle>, RelayerError>;
}

/// Every response shape the backend has been seen to return
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PrepareBundlesResponse {
    /// `{"success": false, "error": "..."}`
    Failure {
        success: bool,
        error: String,
    },
    /// `{"bundles": [{"transactions": [..]}, ..]}`
    Wrapped {
        bundles: Vec<TransactionBundle>,
    },
    /// `{"transactions": [..]}`
    Single(TransactionBundle),
    /// `[{"transactions": [..]}, ..]`
    List(Vec<TransactionBundle>),
    /// `[[..], [..]]`
    Nested(Vec<Vec<String>>),
}

impl PrepareBundlesResponse {
    /// Normalize any accepted shape into a non-empty bundle list.
    pub fn into_bundles(self) -> Result<Vec<TransactionBundle>, RelayerError> {
        let bundles = match self {
            Self::Failure { success, error } => {
                return Err(RelayerError::Protocol(format!(
                    "backend rejected request (success={success}): {error}"
                )));
            }
            Self::Wrapped { bundles } => bundles,
            Self::Single(bundle) => vec![bundle],
            Self::List(bundles) => bundles,
            Self::Nested(lists) => lists.into_iter().map(TransactionBundle::new).collect(),
        };

        let bundles: Vec<_> = bundles.into_iter().filter(|b| !b.is_empty()).collect();
        if bundles.is_empty() {
            return Err(RelayerError::Protocol("backend returned no transactions".into()));
        }
        Ok(bundles)
    }
}

/// Fetches bundles from the backend over HTTP
#[derive(Debug, Clone)]
pub struct HttpBundleSource {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl HttpBundleSource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, RelayerError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| RelayerError::Configuration(format!("invalid backend url {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Configuration(format!("http client: {e}")))?;
        Ok(Self { url, client })
    }
}

#[async_trait]
impl BundleSource for HttpBundleSource {
    #[instrument(skip_all, fields(action = %request.action))]
    async fn prepare_bundles(
        &self,
        request: &PrepareRequest,
    ) -> Result<Vec<TransactionBundle>, RelayerError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(request)
            .send()
            .await
            .inspect_err(|e| warn!(%e, "Failed to reach bundle backend"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayerError::Protocol(format!("backend returned {status}: {text}")));
        }

        response
            .json::<PrepareBundlesResponse>()
            .await
            .map_err(|e| RelayerError::Protocol(format!("unrecognised backend response: {e}")))?
            .into_bundles()
    }
}
