//! Bounded retry with exponential backoff

use clusterflow_cloud::{CloudError, RetryConfig};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Why a retried call gave up
#[derive(Debug)]
pub enum RetryFailure {
    /// Permanent error, or the last transient one once attempts ran out
    Failed(CloudError),
    /// Cancellation arrived while waiting to retry
    Cancelled(CloudError),
}

impl RetryFailure {
    pub fn into_error(self) -> CloudError {
        match self {
            RetryFailure::Failed(e) | RetryFailure::Cancelled(e) => e,
        }
    }
}

/// Call `op` until it succeeds, fails permanently, or `retry.max_attempts`
/// is reached. Only transient errors are retried. A call that is already in
/// flight is never interrupted; cancellation only cuts the backoff sleep.
pub async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> std::result::Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = clusterflow_cloud::Result<T>>,
{
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                warn!(
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient provider error, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryFailure::Cancelled(e)),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(RetryFailure::Failed(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(
            &RetryConfig::immediate(3),
            &CancellationToken::new(),
            "create",
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CloudError::Throttled("429".into()))
                } else {
                    Ok(7)
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: std::result::Result<(), _> = with_retry(
            &RetryConfig::immediate(2),
            &CancellationToken::new(),
            "create",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::Timeout("slow".into()))
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryFailure::Failed(CloudError::Timeout(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: std::result::Result<(), _> = with_retry(
            &RetryConfig::immediate(5),
            &CancellationToken::new(),
            "create",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::QuotaExceeded("droplets".into()))
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let retry = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
        };

        let result: std::result::Result<(), _> = with_retry(&retry, &cancel, "create", || async {
            Err(CloudError::Network("reset".into()))
        })
        .await;

        assert!(matches!(result, Err(RetryFailure::Cancelled(_))));
    }
}
