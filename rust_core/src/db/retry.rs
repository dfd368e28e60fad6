//! Retry with exponential backoff for transient store failures.

use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How often and how patiently to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Execute a store operation, retrying while it fails with a transient error.
///
/// # Example
/// ```ignore
/// let record = execute_with_retry(
///     || async { sqlx::query_as(SQL).bind(key).fetch_optional(&pool).await.map_err(StoreError::from) },
///     RetryPolicy::default(),
///     "lookup",
/// ).await?;
/// ```
pub async fn execute_with_retry<F, Fut, T>(
    mut f: F,
    policy: RetryPolicy,
    operation: &str,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < policy.max_attempts && e.is_transient() => {
                let backoff = policy.backoff(attempt);
                warn!(
                    "Store {} failed (attempt {}/{}): {}. Retrying in {}ms",
                    operation,
                    attempt,
                    policy.max_attempts,
                    e,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
