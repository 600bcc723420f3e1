//! Store gateway: pooled state-store access and cursor-backed streaming reads.
//!
//! Short single-row statements (claim, finalize, reap) run on a bounded sqlx
//! pool. Streaming reads never touch that pool; each stream reserves a
//! dedicated connection for its whole lifetime (see [`cursor`]).

pub mod cursor;

use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;

use crate::config::{BEX_STATE_OPTIONS, IntoConnectOptions, PgConnectionConfig, PoolConfig};
use crate::error::{BexError, BexResult};

/// Maximum attempts for retryable store operations.
const MAX_STORE_ATTEMPTS: u32 = 3;

/// Base delay for store-retry backoff.
const STORE_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Cap on a single store-retry backoff sleep.
const STORE_RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

/// Creates a lazily connected pool for state-store operations.
///
/// Returns immediately without establishing any connections. Connections are
/// created on demand when statements execute and recycled according to the
/// configured idle and lifetime budgets.
pub fn create_state_pool(connection: &PgConnectionConfig, pool: &PoolConfig) -> PgPool {
    let options = connection.with_db(Some(&BEX_STATE_OPTIONS));

    PgPoolOptions::new()
        .min_connections(pool.min_idle)
        .max_connections(pool.max_pool_size)
        .acquire_timeout(Duration::from_millis(pool.connection_timeout_ms))
        .idle_timeout(Some(Duration::from_millis(pool.idle_timeout_ms)))
        .max_lifetime(Some(Duration::from_millis(pool.max_lifetime_ms)))
        .connect_lazy_with(options)
}

/// Runs a store operation, retrying transient failures with backoff.
///
/// Only errors classified retryable by [`BexError::is_retryable`] are
/// retried; everything else, and the last transient failure once attempts
/// are exhausted, propagates to the caller.
pub async fn with_store_retry<T, F, Fut>(operation: &'static str, mut f: F) -> BexResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BexResult<T>>,
{
    let mut delay = STORE_RETRY_BASE_DELAY;

    for attempt in 1..=MAX_STORE_ATTEMPTS {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_STORE_ATTEMPTS => {
                warn!(
                    operation,
                    attempt,
                    error = %err,
                    "store operation failed, retrying after backoff"
                );

                tokio::time::sleep(jittered(delay)).await;
                delay = (delay * 2).min(STORE_RETRY_MAX_DELAY);
            }
            Err(err) => return Err(err),
        }
    }

    unreachable!("retry loop always returns within MAX_STORE_ATTEMPTS")
}

/// Applies ±25% jitter to a backoff delay to spread retries across workers.
pub(crate) fn jittered(delay: Duration) -> Duration {
    let jitter_range = delay.as_secs_f64() * 0.25;

    let mut rng = rand::rng();
    let jitter = rng.random_range(-jitter_range..=jitter_range);

    Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.001))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);

        let result = with_store_retry("test", || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(BexError::new(ErrorKind::StoreUnavailable))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: BexResult<()> = with_store_retry("test", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(BexError::lost_lease(1)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(1_000);
        for _ in 0..100 {
            let delayed = jittered(base);
            assert!(delayed >= Duration::from_millis(750));
            assert!(delayed <= Duration::from_millis(1_250));
        }
    }
}
