//! Backoff policy for oracle transport failures
//!
//! Transient transport errors are retried with capped exponential backoff;
//! everything else (parse failures, configuration errors) returns
//! immediately so the workflow engine can apply its conservative defaults
//! instead of burning attempts.

use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

/// Backoff policy for transient failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts allowed, including the first call
    pub max_attempts: usize,
    /// Delay before the first retry; doubles after each further failure
    pub base_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Randomize delays to keep concurrent runs from retrying in lockstep
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that gives up after the first failure
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set total attempts (floored at one)
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set the pre-doubling base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Builder: set the delay ceiling
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Builder: enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the retry that follows failure number `failures`
    /// (zero-based).
    ///
    /// The base delay doubles per failure up to the ceiling. With jitter
    /// enabled the lower half of the window is kept and the upper half is
    /// randomized, so delays land in `[window/2, window)`.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let doublings = failures.min(16);
        let window = self
            .base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);

        if !self.jitter {
            return window;
        }

        window / 2 + window.mul_f64(0.5 * random_fraction())
    }
}

/// Uniform fraction in [0, 1), taken from the random bits of a v4 UUID
fn random_fraction() -> f64 {
    const STEPS: u128 = 1 << 16;
    (Uuid::new_v4().as_u128() % STEPS) as f64 / STEPS as f64
}

/// Execute an async operation, retrying transient failures with backoff.
///
/// Non-transient errors return immediately without consuming further
/// attempts.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut failures: u32 = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                let out_of_attempts = failures as usize + 1 >= config.max_attempts;
                if !error.is_transient() || out_of_attempts {
                    return Err(error);
                }

                let delay = config.backoff_delay(failures);
                tracing::debug!(
                    "transient oracle failure ({}), retrying in {:?}",
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
                failures += 1;
            }
        }
    }
}
