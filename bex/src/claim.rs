//! Claim-and-lease protocol over the batch registry.
//!
//! Claiming selects the next eligible batch with a row-level exclusive lock
//! that skips already-locked rows, so concurrent workers never receive the
//! same batch. Finalize operations are conditional updates guarded by the
//! lease holder; losing that guard surfaces as a distinct lost-lease error
//! so the worker can discard the produced file.

use std::collections::HashMap;
use std::time::Duration;

use sqlx::{PgPool, Row as _};

use crate::config::ProcessingMode;
use crate::error::{BexError, BexResult};
use crate::types::Lease;

/// Cap on the error message recorded on a failed batch row.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 1_024;

/// Atomically claims the highest-priority pending batch.
///
/// The candidate is selected and locked in one statement: rows already
/// locked by concurrent claimers are skipped, and the winner is moved to
/// `PROCESSING` before the transaction commits. Selection order is
/// `priority DESC, created_at ASC, id ASC`, with the priority taken from
/// the row when materialized and otherwise derived from the business-center
/// mapping passed as `$2`.
const CLAIM_NEXT_SQL: &str = "\
WITH candidate AS (
    SELECT id
    FROM batch_masters
    WHERE status = 'PENDING'
      AND (lease_holder IS NULL OR leased_at < now() - make_interval(secs => $3))
    ORDER BY COALESCE(priority, ($2::jsonb ->> business_center)::int, 0) DESC,
             created_at ASC,
             id ASC
    LIMIT 1
    FOR UPDATE SKIP LOCKED
)
UPDATE batch_masters b
SET status = 'PROCESSING',
    lease_holder = $1,
    leased_at = now(),
    updated_at = now()
FROM candidate
WHERE b.id = candidate.id
RETURNING b.id, b.business_center, b.mode";

const COMPLETE_SQL: &str = "\
UPDATE batch_masters
SET status = 'COMPLETED',
    lease_holder = NULL,
    leased_at = NULL,
    updated_at = now()
WHERE id = $1
  AND status = 'PROCESSING'
  AND lease_holder = $2";

const FAIL_SQL: &str = "\
UPDATE batch_masters
SET status = 'FAILED',
    error_message = $3,
    lease_holder = NULL,
    leased_at = NULL,
    updated_at = now()
WHERE id = $1
  AND status = 'PROCESSING'
  AND lease_holder = $2";

const REAP_STALE_SQL: &str = "\
UPDATE batch_masters
SET status = 'PENDING',
    lease_holder = NULL,
    leased_at = NULL,
    updated_at = now()
WHERE status = 'PROCESSING'
  AND leased_at < now() - make_interval(secs => $1)";

/// Manages batch leases for one worker identity.
#[derive(Debug, Clone)]
pub struct ClaimManager {
    pool: PgPool,
    worker_id: String,
    /// Business-center priority mapping, pre-rendered as the JSONB claim
    /// parameter.
    priorities: serde_json::Value,
    lease_ttl: Duration,
}

impl ClaimManager {
    /// Creates a claim manager bound to a worker identity.
    pub fn new(
        pool: PgPool,
        worker_id: String,
        priorities: &HashMap<String, i32>,
        lease_ttl: Duration,
    ) -> Self {
        let priorities = serde_json::to_value(priorities)
            .expect("a map of string to integer always serializes");

        Self {
            pool,
            worker_id,
            priorities,
            lease_ttl,
        }
    }

    /// Returns the worker identity owning leases claimed through this manager.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claims the next eligible batch, or returns `None` when the queue is
    /// empty.
    ///
    /// Two concurrent calls never return the same batch: the selection takes
    /// a row-level exclusive lock and skips rows locked by other claimers.
    pub async fn claim_next(&self) -> BexResult<Option<Lease>> {
        let row = sqlx::query(CLAIM_NEXT_SQL)
            .bind(&self.worker_id)
            .bind(&self.priorities)
            .bind(self.lease_ttl.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let master_id: i64 = row.try_get("id")?;
        let business_center: String = row.try_get("business_center")?;
        let mode: Option<String> = row.try_get("mode")?;

        Ok(Some(Lease {
            master_id,
            business_center,
            mode: mode.as_deref().and_then(ProcessingMode::from_db),
            worker_id: self.worker_id.clone(),
        }))
    }

    /// Marks a claimed batch as completed and releases the lease.
    ///
    /// Fails with a lost-lease error when the batch is no longer owned by
    /// this worker; the caller must then discard the produced file.
    pub async fn complete(&self, lease: &Lease) -> BexResult<()> {
        let result = sqlx::query(COMPLETE_SQL)
            .bind(lease.master_id)
            .bind(&self.worker_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BexError::lost_lease(lease.master_id));
        }

        Ok(())
    }

    /// Marks a claimed batch as failed, recording a truncated error message.
    pub async fn fail(&self, lease: &Lease, error_message: &str) -> BexResult<()> {
        let result = sqlx::query(FAIL_SQL)
            .bind(lease.master_id)
            .bind(&self.worker_id)
            .bind(truncate_error_message(error_message))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(BexError::lost_lease(lease.master_id));
        }

        Ok(())
    }

    /// Returns every expired `PROCESSING` batch to `PENDING`.
    ///
    /// Safe to run from any worker on any cadence; reaping an already-reaped
    /// queue is a no-op.
    pub async fn reap_stale(&self) -> BexResult<u64> {
        let result = sqlx::query(REAP_STALE_SQL)
            .bind(self.lease_ttl.as_secs_f64())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

/// Truncates an error message to [`ERROR_MESSAGE_MAX_CHARS`] characters,
/// respecting character boundaries.
fn truncate_error_message(message: &str) -> &str {
    match message.char_indices().nth(ERROR_MESSAGE_MAX_CHARS) {
        Some((byte_index, _)) => &message[..byte_index],
        None => message,
    }
}
