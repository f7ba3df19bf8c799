//! Retry-with-backoff for RPC calls.

use std::future::Future;

use sol_sandbox_types::RetryConfig;
use tracing::debug;

use crate::rpc::RpcError;

pub fn should_retry_error(error: &RpcError) -> bool {
    error.is_transient()
}

/// Run `f` until it succeeds, fails with a non-transient error, or the retry
/// budget is spent. Backoff doubles from `initial_backoff` up to `max_backoff`.
pub async fn with_retries<T, F, Fut>(retry: &RetryConfig, label: &str, f: F) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    with_retries_notify(retry, label, |_, _| {}, f).await
}

/// Like [`with_retries`], calling `on_retry(attempt, &error)` before each
/// backoff sleep.
pub async fn with_retries_notify<T, F, Fut, N>(
    retry: &RetryConfig,
    label: &str,
    mut on_retry: N,
    mut f: F,
) -> Result<T, RpcError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
    N: FnMut(usize, &RpcError),
{
    let mut attempt = 0usize;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= retry.retries || !should_retry_error(&e) {
                    return Err(e);
                }
                attempt += 1;
                let backoff = retry.backoff_for(attempt);
                debug!(call = label, attempt, ?backoff, error = %e, "retrying RPC call");
                on_retry(attempt, &e);
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicUsize::new(0);
        let mut notified = 0;
        let result = with_retries_notify(
            &RetryConfig::new(3, 1, 2),
            "test",
            |_, _| notified += 1,
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RpcError::Timeout)
                } else {
                    Ok(7)
                }
            },
        )
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notified, 2);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retries(&RetryConfig::new(5, 1, 1), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Rejected("invalid signature".into()))
        })
        .await;
        assert!(matches!(result, Err(RpcError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = with_retries(&RetryConfig::new(2, 1, 1), "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RpcError::Transport("connection refused".into()))
        })
        .await;
        assert!(matches!(result, Err(RpcError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
