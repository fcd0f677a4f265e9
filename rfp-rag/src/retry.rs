//! Bounded retries with exponential backoff and a hard per-attempt timeout.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{RagError, Result};

/// How often and how patiently a model call is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. `0` means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubled for every further retry.
    pub base_delay: Duration,
    /// Hard limit for a single attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt.
    pub fn no_retries(timeout: Duration) -> Self {
        Self { max_retries: 0, base_delay: Duration::ZERO, timeout }
    }

    /// Backoff before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(retry))
    }

    /// Run `operation` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    ///
    /// Only [`RagError::BackendUnavailable`] is retried; every other error is
    /// returned immediately. An attempt exceeding `timeout` counts as
    /// `BackendUnavailable`.
    pub async fn run<T, F, Fut>(&self, backend: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            let outcome = match tokio::time::timeout(self.timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(RagError::BackendUnavailable {
                    backend: backend.to_string(),
                    message: format!("call timed out after {:?}", self.timeout),
                }),
            };

            match outcome {
                Err(e @ RagError::BackendUnavailable { .. }) if retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(backend, retry = retry + 1, ?delay, error = %e, "transient backend failure, retrying");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                other => return other,
            }
        }
    }
}
