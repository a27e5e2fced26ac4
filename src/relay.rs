use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{instrument, warn};

use crate::error::RelayerError;
use crate::signing::TxEncoding;

/// Accepts signed bundles for submission
#[async_trait]
pub trait RelayClient: Send + Sync {
    /// Submit one bundle of encoded, fully signed transactions.
    ///
    /// Returns the relay-assigned bundle id.
    async fn submit_bundle(&self, transactions: &[String]) -> Result<String, RelayerError>;
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

/// Block-engine `sendBundle` JSON-RPC client
#[derive(Debug, Clone)]
pub struct JitoRelayClient {
    url: reqwest::Url,
    client: reqwest::Client,
    encoding: TxEncoding,
}

impl JitoRelayClient {
    pub fn new(url: &str, timeout: Duration, encoding: TxEncoding) -> Result<Self, RelayerError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| RelayerError::Configuration(format!("invalid relay url {url}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RelayerError::Configuration(format!("http client: {e}")))?;
        Ok(Self::new_with_client(url, client, encoding))
    }

    pub const fn new_with_client(
        url: reqwest::Url,
        client: reqwest::Client,
        encoding: TxEncoding,
    ) -> Self {
        Self { url, client, encoding }
    }

    fn request_body(&self, transactions: &[String]) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "sendBundle",
            "params": [transactions, { "encoding": self.encoding.as_str() }],
        })
    }
}

/// Extract the bundle id from a `sendBundle` response body.
fn parse_send_bundle(body: JsonRpcResponse) -> Result<String, RelayerError> {
    if let Some(err) = body.error {
        return Err(RelayerError::Protocol(format!(
            "relay error {}: {}",
            err.code, err.message
        )));
    }
    match body.result {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        Some(other) => Err(RelayerError::Protocol(format!(
            "unexpected sendBundle result: {other}"
        ))),
        None => Err(RelayerError::Protocol("sendBundle response has no result".into())),
    }
}

#[async_trait]
impl RelayClient for JitoRelayClient {
    #[instrument(skip_all, fields(txs = transactions.len()))]
    async fn submit_bundle(&self, transactions: &[String]) -> Result<String, RelayerError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&self.request_body(transactions))
            .send()
            .await
            .inspect_err(|e| warn!(%e, "Failed to reach relay"))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RelayerError::Protocol(format!("relay returned {status}: {text}")));
        }

        let body = response
            .json::<JsonRpcResponse>()
            .await
            .map_err(|e| RelayerError::Protocol(format!("malformed relay response: {e}")))?;
        parse_send_bundle(body)
    }
}
