//! Automatic retry with exponential backoff and jitter.
//!
//! [`RetryConfig`] computes backoff delays; [`RetryExecutor`] runs an
//! operation under a per-attempt [`Deadline`] and retries failures until the
//! budget is spent. Caller cancellation is never retried and aborts a pending
//! backoff sleep immediately.

use std::future::Future;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::cancel::{Deadline, Interrupt};
use crate::config::DEFAULT_MAX_RETRIES;
use crate::error::{Error, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 = no retries, just fail immediately).
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0 for exponential backoff).
    pub multiplier: f64,
    /// Scale each delay by a random factor in `[0.75, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of retries. Uses sensible defaults.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// `min(initial * multiplier^attempt, max)`, then scaled by a factor drawn
    /// from `rng` in `[0.75, 1.0]` when jitter is on. Jitter only ever
    /// shortens the delay.
    pub fn delay_for_attempt<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        // Past 64 doublings the cap always wins; keeps powi in range.
        let exponent = attempt.min(64) as i32;
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let factor: f64 = rng.random_range(0.75..=1.0);
            Duration::from_secs_f64(capped * factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Runs one logical operation with timeout, cancellation and retry.
///
/// An executor belongs to a single call: it owns its random source and keeps
/// no state between invocations of [`execute`](Self::execute) other than that.
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    timeout: Duration,
    rng: StdRng,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replace the jitter source, e.g. with a seeded generator in tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Run `op` until it succeeds or fails terminally.
    ///
    /// Each attempt gets a fresh [`Deadline`]; `op` receives its effective
    /// token. With `retryable == false` exactly one attempt is made. Otherwise
    /// at most `max_retries + 1` attempts run, separated by backoff sleeps
    /// that observe only the caller's `cancel` token.
    pub async fn execute<T, F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        retryable: bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut remaining = self.config.max_retries;
        let mut attempts_used = 0u32;

        loop {
            let deadline = Deadline::new(cancel, self.timeout);
            let err = match self.run_attempt(&deadline, op(deadline.token())).await {
                Ok(value) => return Ok(value),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => e,
            };
            drop(deadline);

            if !retryable || remaining == 0 {
                if retryable {
                    debug!("Retry budget exhausted after {} attempt(s)", attempts_used + 1);
                }
                return Err(err);
            }

            let delay = self
                .config
                .delay_for_attempt(attempts_used, &mut self.rng);
            warn!(
                "Request failed (attempt {}/{}): {err}. Retrying in {delay:?}...",
                attempts_used + 1,
                self.config.max_retries + 1,
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            remaining -= 1;
            attempts_used += 1;
        }
    }

    /// Run a single non-retried step (e.g. reading a response body) under the
    /// same timeout and cancellation rules as an attempt.
    pub async fn execute_once<T, Fut>(&self, cancel: &CancellationToken, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Deadline::new(cancel, self.timeout);
        self.run_attempt(&deadline, fut).await
    }

    async fn run_attempt<T, Fut>(&self, deadline: &Deadline, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        match deadline.run(fut).await {
            Ok(result) => result,
            Err(Interrupt::UserCancelled) => Err(Error::Cancelled),
            Err(Interrupt::TimedOut) => Err(Error::Timeout(self.timeout)),
        }
    }
}
