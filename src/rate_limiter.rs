use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::Clock;
use crate::config::RateLimitConfig;
use crate::error::RelayerError;

/// Process-wide cap on outbound bundle submissions.
///
/// Keeps the dispatch times of the last `max_per_window` permits, so no
/// window of `window` length ever holds more than `max_per_window` permits.
/// Shared by every concurrent operation through an `Arc`. Both the window
/// bookkeeping and the wait for a free slot run on the injected [`Clock`].
pub struct RateLimiter {
    dispatched: Mutex<VecDeque<Instant>>,
    max_per_window: usize,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let max_per_window = config.max_per_window.max(1) as usize;
        Self {
            dispatched: Mutex::new(VecDeque::with_capacity(max_per_window)),
            max_per_window,
            window: config.window(),
            clock,
        }
    }

    /// Wait for a submission permit.
    ///
    /// Returns `Cancelled` if `cancel` fires while waiting.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), RelayerError> {
        loop {
            if cancel.is_cancelled() {
                return Err(RelayerError::Cancelled);
            }

            let wait_until = {
                let mut dispatched = self.dispatched.lock().await;
                let now = self.clock.now();

                while dispatched
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
                {
                    dispatched.pop_front();
                }

                if dispatched.len() < self.max_per_window {
                    dispatched.push_back(now);
                    return Ok(());
                }

                match dispatched.front() {
                    Some(oldest) => *oldest + self.window,
                    None => now,
                }
            };

            debug!(
                wait_ms = wait_until
                    .saturating_duration_since(self.clock.now())
                    .as_millis() as u64,
                "Rate limit reached, waiting for window"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(RelayerError::Cancelled),
                _ = self.clock.sleep_until(wait_until) => {}
            }
        }
    }

    /// Permits handed out within the current window.
    pub async fn in_flight(&self) -> usize {
        let now = self.clock.now();
        self.dispatched
            .lock()
            .await
            .iter()
            .filter(|t| now.saturating_duration_since(**t) < self.window)
            .count()
    }
}
