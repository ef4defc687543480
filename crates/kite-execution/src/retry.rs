//! Bounded exponential backoff at the broker adapter boundary.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::broker::BrokerError;

/// Attempts made before giving up (the first call plus two retries).
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Run `op` with bounded retries on retryable broker errors.
///
/// Delay doubles after each failed attempt starting from `base_delay`.
/// Non-retryable errors (rejections, unknown ids) surface immediately;
/// exhausting the attempts surfaces the last error unchanged, which for a
/// transport failure is `Unavailable` — the caller maps it to the
/// `BROKER_UNAVAILABLE` boundary kind.
pub async fn with_retry<T, F, Fut>(
    what: &str,
    attempts: u32,
    base_delay: Duration,
    mut op: F,
) -> Result<T, BrokerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut delay = base_delay;
    let mut last_err = BrokerError::Unavailable {
        detail: format!("{what}: no attempts made"),
    };

    for attempt in 1..=attempts.max(1) {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(what, attempt, error = %e, "broker call failed; retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                last_err = e;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let out = with_retry("test", 3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, BrokerError>(7) }
        })
        .await
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = with_retry("test", 3, Duration::from_millis(10), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BrokerError::Timeout)
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let err = with_retry("test", 3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(BrokerError::Unavailable {
                    detail: "down".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::Unavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn rejection_is_not_retried() {
        let calls = AtomicU32::new(0);
        let err = with_retry("test", 3, Duration::from_millis(10), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(BrokerError::Rejected {
                    detail: "bad symbol".into(),
                })
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
