//! Backoff retries for transient transport failures.
//!
//! Only the HTTP collaborators retry, and only for calls that are safe to
//! repeat (reads and property creation). The sync pipeline never retries.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crmsync_common::Result;

/// Retry policy: doubling delays from `initial_delay`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Randomize each delay to 50-100% of its nominal value.
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy with `max_retries` retries and default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Set the delay before the first retry.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let nominal = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);

        if self.jitter {
            nominal.mul_f64(0.5 + rand::random::<f64>() * 0.5)
        } else {
            nominal
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Runs collaborator calls under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create an executor for a policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, repeating it while it fails with a transient error.
    ///
    /// `what` names the call in logs. Any other error is returned as is.
    pub async fn execute<F, Fut, T>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0;

        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!("{} succeeded after {} retries", what, retries);
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && retries < self.config.max_retries => err,
                Err(err) => {
                    if retries > 0 {
                        warn!("{} gave up after {} retries: {}", what, retries, err);
                    }
                    return Err(err);
                }
            };

            let delay = self.config.delay_for_attempt(retries);
            retries += 1;
            warn!("{} failed ({}), retry {} in {:?}", what, err, retries, delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// Get the retry policy.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
