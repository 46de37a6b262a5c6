//! Retry for SQLite lock contention
//!
//! Workers save concurrently into one SQLite file; a writer can hit
//! `database is locked` while another holds the write lock. Those errors are
//! retried with exponential backoff until `max_wait` elapses. Every other
//! error returns immediately.

use mastr_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// Retry `operation` while it fails with a lock error
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !is_lock_error(&err) {
            return Err(err);
        }

        let elapsed = started.elapsed();
        if elapsed >= max_wait {
            tracing::error!(
                operation = operation_name,
                attempt,
                elapsed_ms = elapsed.as_millis() as u64,
                "Database still locked, giving up"
            );
            return Err(err);
        }

        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms,
            "Database locked, retrying"
        );
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
    }
}

fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let message = db_err.to_string();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_first_attempt_success() {
        let result = retry_on_lock("save_job", Duration::from_secs(1), || async {
            Ok::<_, Error>(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_other_errors_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result = retry_on_lock("save_job", Duration::from_secs(5), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::Internal("constraint failed".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lock_error_retried_until_deadline() {
        let attempts = AtomicUsize::new(0);
        let result = retry_on_lock("save_job", Duration::from_millis(60), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(Error::Database(sqlx::Error::Protocol(
                    "database is locked".to_string(),
                )))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::Database(_))));
        assert!(attempts.load(Ordering::SeqCst) > 1);
    }
}
