//! Bounded retry with exponential backoff for transient catalog failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::r#trait::CatalogError;

/// Retry policy: bounded attempts, exponential backoff.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-based attempt that just failed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 200ms, 400ms, 800ms, ... capped at 5s.
        let factor = 1u32 << attempt.min(5);
        (self.base_delay * factor).min(Duration::from_secs(5))
    }

    /// Run `op`, retrying transient (`Connection`) errors up to the bound.
    ///
    /// Non-retryable errors surface immediately.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = op_name,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient catalog failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
