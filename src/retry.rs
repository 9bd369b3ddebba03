//! Bounded retry with linear back-off for remote writes.

use crate::error::StoreError;
use std::future::Future;
use std::time::Duration;

/// Total attempts (first try included) for a user insert.
pub const USER_INSERT_ATTEMPTS: u32 = 3;

/// Whether a failed insert is worth another attempt.
///
/// Unique violations are settled by the caller's update fallback, and
/// `NotFound` cannot come out of an insert, so neither is retried. Every other
/// failure is, validation rejections included.
pub fn is_retriable_insert(err: &StoreError) -> bool {
    !matches!(
        err,
        StoreError::UniqueViolation { .. } | StoreError::NotFound { .. }
    )
}

/// Runs `operation` up to `max_attempts` times.
///
/// The sleep before attempt `n + 1` is `delay_ms × n`. Errors rejected by
/// `retriable` are returned immediately.
pub async fn retry_linear<T, F, Fut, P>(
    max_attempts: u32,
    delay_ms: u64,
    retriable: P,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    P: Fn(&StoreError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !retriable(&err) || attempt >= max_attempts {
                    return Err(err);
                }
                let wait = delay_ms.saturating_mul(u64::from(attempt));
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = wait,
                    error = %err,
                    "Write failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(wait)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn unavailable() -> StoreError {
        StoreError::Rejected {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_only_unique_and_not_found_are_final() {
        assert!(!is_retriable_insert(&StoreError::UniqueViolation {
            message: "dup".to_string()
        }));
        assert!(!is_retriable_insert(&StoreError::NotFound {
            table: "profiles".to_string(),
            filter: "email=eq.a@x.fr".to_string()
        }));
        assert!(is_retriable_insert(&unavailable()));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_linear(3, 0, is_retriable_insert, || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(unavailable())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_linear(3, 0, is_retriable_insert, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Rejected { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unique_violation_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_linear(3, 0, is_retriable_insert, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::UniqueViolation {
                    message: "dup".to_string(),
                })
            }
        })
        .await;

        assert!(result.unwrap_err().is_unique_violation());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_rejection_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_linear(3, 0, is_retriable_insert, || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(StoreError::Rejected {
                    status: 400,
                    message: "invalid input syntax for type date".to_string(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Rejected { status: 400, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
