//! Provider Retry Policy
//!
//! Bounded exponential backoff for transient provider failures, built on
//! `backon`. Non-retryable categories (auth, schema rejection, exhausted
//! credits) abort immediately.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::constants::chat;
use crate::types::{LoomError, Result};

/// Backoff policy shared by chat and research calls
fn policy(max_retries: usize) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(chat::BASE_DELAY_MS))
        .with_max_delay(Duration::from_secs(chat::MAX_DELAY_SECS))
        .with_max_times(max_retries)
        .with_jitter()
}

/// Run an async operation with bounded retry on recoverable errors.
///
/// `operation` is a label for log lines only.
pub async fn with_retry<T, F, Fut>(operation: &str, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_times(operation, chat::DEFAULT_MAX_RETRIES, f).await
}

/// Like [`with_retry`] with an explicit retry budget
pub async fn with_retry_times<T, F, Fut>(operation: &str, max_retries: usize, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    f.retry(policy(max_retries))
        .when(LoomError::is_recoverable)
        .notify(|err: &LoomError, dur: Duration| {
            warn!(%operation, delay_ms = dur.as_millis() as u64, error = %err, "Retrying after error");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::types::{ErrorCategory, ProviderError};

    fn transient() -> LoomError {
        LoomError::Provider(ProviderError::with_provider(
            ErrorCategory::Transient,
            "flaky",
            "test",
        ))
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = with_retry_times("op", 3, || async {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err(transient()) } else { Ok(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = with_retry_times("op", 3, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(LoomError::SchemaRejected {
                task_id: "t1".to_string(),
                message: "rejected".to_string(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32> = with_retry_times("op", 2, || async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;
        assert!(result.is_err());
        // Initial attempt plus two retries
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
