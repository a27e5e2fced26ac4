use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Exponential backoff with multiplicative jitter
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    multiplier: f64,
    jitter_min: f64,
    jitter_max: f64,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay(),
            multiplier: config.multiplier,
            jitter_min: config.jitter_min,
            jitter_max: config.jitter_max,
            max_delay: config.max_delay(),
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_max > self.jitter_min {
            rand::thread_rng().gen_range(self.jitter_min..=self.jitter_max)
        } else {
            self.jitter_min
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// `base * multiplier^attempt * jitter`, capped at the configured maximum.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: f64) -> Duration {
        let exp = self.multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base.as_secs_f64() * exp * jitter;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}
