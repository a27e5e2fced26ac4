use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::RetryConfig;
use crate::error::RelayerError;
use crate::rate_limiter::RateLimiter;
use crate::relay::RelayClient;
use crate::signing::{TxEncoding, complete_bundle_signing};
use crate::types::{BundleResult, OperationResult, SigningWallet, TransactionBundle};

/// Signs, rate-limits and submits the bundles of one operation
#[derive(Clone)]
pub struct BundlePipeline {
    relay: Arc<dyn RelayClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryConfig,
    backoff: Backoff,
    encoding: TxEncoding,
}

impl BundlePipeline {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryConfig,
        encoding: TxEncoding,
    ) -> Self {
        Self {
            relay,
            limiter,
            backoff: Backoff::new(&retry),
            retry,
            encoding,
        }
    }

    /// Sign and submit `bundles`, bundle 0 first.
    ///
    /// Bundle 0 is retried with backoff and its failure aborts the
    /// operation. Later bundles are only attempted once it has landed. They
    /// go out one after another in index order, a single attempt each, and
    /// one failing does not stop the rest.
    pub async fn execute(
        &self,
        wallets: &[SigningWallet],
        bundles: &[TransactionBundle],
        cancel: &CancellationToken,
    ) -> OperationResult {
        let operation_id = Uuid::new_v4();
        let total = bundles.len();

        if total == 0 {
            let err = RelayerError::Configuration("operation has no bundles".into());
            return OperationResult::failed(operation_id, 0, &err);
        }

        // signing failures are configuration errors and cost no network attempt
        let signed = match complete_bundle_signing(bundles, wallets, self.encoding) {
            Ok(signed) => signed,
            Err(e) => {
                error!(%operation_id, %e, "Failed to sign bundles");
                return OperationResult::failed(operation_id, total, &e);
            }
        };

        info!(%operation_id, bundles = total, "Submitting operation");

        let critical = match self.submit_critical(&signed[0], cancel).await {
            Ok(result) => result,
            Err((attempts, e)) => {
                error!(%operation_id, attempts, %e, "Critical bundle failed, aborting operation");
                let results = vec![BundleResult::failed(0, attempts, &e)];
                return OperationResult::from_results(operation_id, total, results, Some(&e));
            }
        };

        let mut results = vec![critical];
        results.extend(self.submit_remaining(&signed[1..], cancel).await);

        if cancel.is_cancelled() {
            return OperationResult::from_results(
                operation_id,
                total,
                results,
                Some(&RelayerError::Cancelled),
            );
        }

        let op = OperationResult::from_results(operation_id, total, results, None);
        info!(
            %operation_id,
            succeeded = op.success_count,
            failed = op.failure_count,
            "Operation finished"
        );
        op
    }

    /// Submit the critical bundle with bounded retry.
    ///
    /// The loop stops at `max_attempts` or `max_consecutive_errors`,
    /// whichever comes first. Since the error count is never reset inside
    /// the loop, the smaller of the two limits is the effective budget.
    /// On failure returns the attempts made alongside the terminal error.
    pub async fn submit_critical(
        &self,
        bundle: &TransactionBundle,
        cancel: &CancellationToken,
    ) -> Result<BundleResult, (u32, RelayerError)> {
        let mut attempts = 0u32;
        let mut consecutive_errors = 0u32;
        let mut last_error = None;

        while attempts < self.retry.max_attempts
            && consecutive_errors < self.retry.max_consecutive_errors
        {
            let attempt = attempts;
            attempts += 1;

            match self.submit_once(bundle, cancel).await {
                Ok(bundle_id) => {
                    info!(%bundle_id, attempts, "Critical bundle accepted");
                    return Ok(BundleResult::succeeded(0, bundle_id, attempts));
                }
                Err(RelayerError::Cancelled) => return Err((attempts, RelayerError::Cancelled)),
                Err(e) if !e.is_retryable() => return Err((attempts, e)),
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(attempt = attempts, %e, "Critical bundle submission failed");
                    last_error = Some(e);

                    if attempts >= self.retry.max_attempts
                        || consecutive_errors >= self.retry.max_consecutive_errors
                    {
                        break;
                    }

                    let delay = self.backoff.delay(attempt);
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err((attempts, RelayerError::Cancelled)),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        Err((
            attempts,
            RelayerError::Exhausted {
                attempts,
                last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
            },
        ))
    }

    /// One rate-limited submission. Results arriving after cancellation are discarded.
    async fn submit_once(
        &self,
        bundle: &TransactionBundle,
        cancel: &CancellationToken,
    ) -> Result<String, RelayerError> {
        self.limiter.acquire(cancel).await?;
        let result = self.relay.submit_bundle(&bundle.transactions).await;
        if cancel.is_cancelled() {
            debug!("Discarding relay response for cancelled operation");
            return Err(RelayerError::Cancelled);
        }
        result
    }

    /// Submit the best-effort bundles in order, one attempt each.
    async fn submit_remaining(
        &self,
        bundles: &[TransactionBundle],
        cancel: &CancellationToken,
    ) -> Vec<BundleResult> {
        let mut results = Vec::with_capacity(bundles.len());
        for (offset, bundle) in bundles.iter().enumerate() {
            let index = offset + 1;
            let result = match self.submit_once(bundle, cancel).await {
                Ok(bundle_id) => BundleResult::succeeded(index, bundle_id, 1),
                Err(e) => {
                    warn!(index, %e, "Bundle submission failed");
                    BundleResult::failed(index, 1, &e)
                }
            };
            results.push(result);
        }
        results
    }
}
