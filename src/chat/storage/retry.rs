//! Bounded retry with exponential backoff for store operations.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::chat::core::config::RetryConfig;
use crate::chat::storage::conversation_store::StoreResult;

/// Backoff before the next attempt: `base` after the first failure, doubling
/// on each subsequent one.
fn backoff_delay(base: Duration, failed_attempts: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(failed_attempts.saturating_sub(1)))
}

/// Run a store operation with bounded retry.
///
/// Up to `max_attempts` total attempts; only transient failures (see
/// [`crate::chat::core::errors::StoreError::is_transient`]) are retried,
/// data-integrity and not-found errors return immediately. Each call owns
/// its own attempt counter; nothing is shared between invocations.
///
/// # Errors
/// Returns the last error once the retry budget is exhausted, or the first
/// non-transient error.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, mut operation: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < config.max_attempts => {
                let delay = backoff_delay(config.base_delay(), attempt);
                warn!(attempt, ?delay, error = %err, "Transient store failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
