//! Batch processor: drives reader -> transformer -> emitter under a lease.
//!
//! The pipeline is lazy end to end; memory usage is independent of batch
//! cardinality. Per-row failures are handled by the configured error
//! policy, per-batch failures abort the emitter and fail the lease, and a
//! lost lease at finalize time discards the already-written file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::claim::ClaimManager;
use crate::config::{ErrorPolicy, PgConnectionConfig, ProcessingMode, WorkerConfig};
use crate::emit::{FileEmitter, FileHeader};
use crate::error::{BexError, BexResult, ErrorKind};
use crate::reader::DetailReader;
use crate::store::with_store_retry;
use crate::transform;
use crate::types::{BatchSummary, Detail, Lease};

/// Processes claimed batches end to end.
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    reader: DetailReader,
    claims: ClaimManager,
    config: Arc<WorkerConfig>,
    cancel_rx: watch::Receiver<bool>,
}

impl BatchProcessor {
    pub fn new(
        connection_config: PgConnectionConfig,
        claims: ClaimManager,
        config: Arc<WorkerConfig>,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        let reader = DetailReader::new(connection_config, config.batch_size);

        Self {
            reader,
            claims,
            config,
            cancel_rx,
        }
    }

    /// Processes one claimed batch and finalizes its lease.
    ///
    /// On success exactly one well-formed output file exists and the batch
    /// is `COMPLETED`. On any failure the file is deleted and the batch is
    /// `FAILED` (or back to `PENDING` once the lease is reaped).
    pub async fn process(&mut self, lease: &Lease) -> BexResult<BatchSummary> {
        let mode = lease.mode.unwrap_or(self.config.mode);

        let path = build_output_path(
            &self.config.output_directory,
            &lease.business_center,
            lease.master_id,
            mode,
            Utc::now(),
        )
        .await;
        let mut emitter = FileEmitter::new(path);

        match self.run_pipeline(lease, mode, &mut emitter).await {
            Ok(summary) => self.finalize(lease, &mut emitter, summary).await,
            Err(err) => {
                emitter.abort().await;
                self.fail_lease(lease, &err).await;

                Err(err)
            }
        }
    }

    /// Streams details through the transformer into the emitter.
    async fn run_pipeline(
        &mut self,
        lease: &Lease,
        mode: ProcessingMode,
        emitter: &mut FileEmitter,
    ) -> BexResult<BatchSummary> {
        info!(
            master_id = lease.master_id,
            business_center = %lease.business_center,
            mode = mode.as_str(),
            output = %emitter.path().display(),
            "processing batch"
        );

        emitter
            .open(&FileHeader {
                master_id: lease.master_id,
                business_center: lease.business_center.clone(),
                business_date: Utc::now(),
            })
            .await?;

        let mut details = self.reader.stream(lease.master_id, mode).await?;
        let result = drive_pipeline(
            &mut details,
            emitter,
            mode,
            self.config.error_policy,
            &self.cancel_rx,
        )
        .await;
        details.close();

        result
    }

    /// Closes the emitter and completes the lease.
    ///
    /// A lost lease here means another worker may already own the batch, so
    /// the produced file is discarded.
    async fn finalize(
        &self,
        lease: &Lease,
        emitter: &mut FileEmitter,
        summary: BatchSummary,
    ) -> BexResult<BatchSummary> {
        if let Err(err) = emitter.close().await {
            emitter.abort().await;
            self.fail_lease(lease, &err).await;

            return Err(err);
        }

        let claims = &self.claims;
        if let Err(err) = with_store_retry("complete", || claims.complete(lease)).await {
            emitter.abort().await;

            if !matches!(err.kind(), ErrorKind::LostLease { .. }) {
                self.fail_lease(lease, &err).await;
            }

            return Err(err);
        }

        info!(
            master_id = lease.master_id,
            rows_emitted = summary.rows_emitted,
            rows_skipped = summary.rows_skipped,
            output = %emitter.path().display(),
            "batch completed"
        );

        Ok(summary)
    }

    /// Best-effort lease failure; an unreachable store leaves the lease to
    /// the reaper.
    async fn fail_lease(&self, lease: &Lease, err: &BexError) {
        let message = match err.kind() {
            ErrorKind::Cancelled => "cancelled".to_string(),
            _ => err.to_string(),
        };

        let claims = &self.claims;
        if let Err(fail_err) = with_store_retry("fail", || claims.fail(lease, &message)).await {
            warn!(
                master_id = lease.master_id,
                error = %fail_err,
                "could not record batch failure, lease will expire via reaping"
            );
        }
    }
}

/// Pulls details through the flattener into the emitter, applying the
/// per-row error policy.
async fn drive_pipeline<S>(
    details: &mut S,
    emitter: &mut FileEmitter,
    mode: ProcessingMode,
    policy: ErrorPolicy,
    cancel_rx: &watch::Receiver<bool>,
) -> BexResult<BatchSummary>
where
    S: Stream<Item = BexResult<Detail>> + Unpin,
{
    let mut rows_skipped = 0u64;

    while let Some(item) = details.next().await {
        if *cancel_rx.borrow() {
            return Err(BexError::cancelled());
        }

        let detail = item?;

        match transform::flatten(&detail, mode) {
            Ok(row) => emitter.write_detail(&row).await?,
            Err(row_error) => match policy {
                ErrorPolicy::SkipRow => {
                    rows_skipped += 1;
                    warn!(detail_id = row_error.detail_id, error = %row_error, "skipping detail row");
                }
                ErrorPolicy::AbortBatch => return Err(row_error.into()),
            },
        }
    }

    Ok(BatchSummary {
        rows_emitted: emitter.record_count(),
        rows_skipped,
    })
}

/// Builds the output path `{dir}/{center}_{master}{suffix}_{ts}.txt`,
/// breaking collisions on the timestamp second with a monotone counter.
async fn build_output_path(
    directory: &Path,
    business_center: &str,
    master_id: i64,
    mode: ProcessingMode,
    now: DateTime<Utc>,
) -> PathBuf {
    let base = format!(
        "{business_center}_{master_id}{suffix}_{timestamp}",
        suffix = mode.file_suffix(),
        timestamp = now.format("%Y%m%d_%H%M%S"),
    );

    let mut candidate = directory.join(format!("{base}.txt"));
    let mut counter = 1u32;

    while matches!(tokio::fs::try_exists(&candidate).await, Ok(true)) {
        candidate = directory.join(format!("{base}_{counter}.txt"));
        counter += 1;
    }

    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use futures::stream;
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn detail(detail_id: i64, amount: &str, payload: Option<&str>) -> Detail {
        Detail {
            detail_id,
            master_id: 1,
            record_type: "TXN".to_string(),
            account_number: format!("ACC{detail_id:03}"),
            customer_name: "Ada".to_string(),
            amount: amount.parse::<Decimal>().unwrap(),
            currency: "USD".to_string(),
            description: "coffee".to_string(),
            transaction_date: Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap(),
            transaction_payload: payload.map(str::to_string),
        }
    }

    fn file_header() -> FileHeader {
        FileHeader {
            master_id: 1,
            business_center: "NYC".to_string(),
            business_date: Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap(),
        }
    }

    async fn open_emitter(dir: &TempDir, name: &str) -> FileEmitter {
        let mut emitter = FileEmitter::new(dir.path().join(name));
        emitter.open(&file_header()).await.unwrap();
        emitter
    }

    fn no_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_pipeline_emits_all_rows() {
        let dir = TempDir::new().unwrap();
        let mut emitter = open_emitter(&dir, "all.txt").await;
        let mut details = stream::iter(vec![
            Ok(detail(1, "10.00", None)),
            Ok(detail(2, "5.50", None)),
        ]);

        let summary = drive_pipeline(
            &mut details,
            &mut emitter,
            ProcessingMode::Standard,
            ErrorPolicy::AbortBatch,
            &no_cancel(),
        )
        .await
        .unwrap();
        emitter.close().await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                rows_emitted: 2,
                rows_skipped: 0,
            }
        );

        let contents = std::fs::read_to_string(emitter.path()).unwrap();
        assert!(contents.ends_with("TRAILER|2|15.50\n"));
    }

    #[tokio::test]
    async fn test_skip_row_policy_counts_and_continues() {
        let dir = TempDir::new().unwrap();
        let mut emitter = open_emitter(&dir, "skip.txt").await;
        let mut details = stream::iter(vec![
            Ok(detail(1, "10.00", Some("{}"))),
            Ok(detail(2, "99.99", Some("{malformed"))),
            Ok(detail(3, "5.50", Some("{}"))),
        ]);

        let summary = drive_pipeline(
            &mut details,
            &mut emitter,
            ProcessingMode::StreamingJsonb,
            ErrorPolicy::SkipRow,
            &no_cancel(),
        )
        .await
        .unwrap();
        emitter.close().await.unwrap();

        assert_eq!(
            summary,
            BatchSummary {
                rows_emitted: 2,
                rows_skipped: 1,
            }
        );

        let contents = std::fs::read_to_string(emitter.path()).unwrap();
        assert!(contents.contains("TRAILER|2|15.50"));
        assert!(!contents.contains("99.99"));
    }

    #[tokio::test]
    async fn test_abort_batch_policy_stops_at_first_bad_row() {
        let dir = TempDir::new().unwrap();
        let mut emitter = open_emitter(&dir, "abort.txt").await;
        let mut details = stream::iter(vec![
            Ok(detail(1, "10.00", Some("{}"))),
            Ok(detail(2, "99.99", Some("{malformed"))),
            Ok(detail(3, "5.50", Some("{}"))),
        ]);

        let err = drive_pipeline(
            &mut details,
            &mut emitter,
            ProcessingMode::StreamingJsonb,
            ErrorPolicy::AbortBatch,
            &no_cancel(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err.kind(),
            ErrorKind::RowRejected { detail_id: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_stream_error_aborts_the_batch() {
        let dir = TempDir::new().unwrap();
        let mut emitter = open_emitter(&dir, "stream_err.txt").await;
        let mut details = stream::iter(vec![
            Ok(detail(1, "10.00", None)),
            Err(BexError::new(ErrorKind::StoreUnavailable)),
        ]);

        let err = drive_pipeline(
            &mut details,
            &mut emitter,
            ProcessingMode::Standard,
            ErrorPolicy::SkipRow,
            &no_cancel(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::StoreUnavailable));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_pipeline() {
        let dir = TempDir::new().unwrap();
        let mut emitter = open_emitter(&dir, "cancel.txt").await;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        cancel_tx.send(true).unwrap();

        let mut details = stream::iter(vec![Ok(detail(1, "10.00", None))]);

        let err = drive_pipeline(
            &mut details,
            &mut emitter,
            ProcessingMode::Standard,
            ErrorPolicy::AbortBatch,
            &cancel_rx,
        )
        .await
        .unwrap_err();

        assert!(matches!(err.kind(), ErrorKind::Cancelled));
    }

    #[tokio::test]
    async fn test_output_path_shapes_per_mode() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();

        let standard =
            build_output_path(dir.path(), "NYC", 1, ProcessingMode::Standard, now).await;
        let enhanced =
            build_output_path(dir.path(), "NYC", 1, ProcessingMode::Enhanced, now).await;
        let jsonb =
            build_output_path(dir.path(), "NYC", 1, ProcessingMode::StreamingJsonb, now).await;

        assert_eq!(
            standard.file_name().unwrap(),
            "NYC_1_20260314_092653.txt"
        );
        assert_eq!(
            enhanced.file_name().unwrap(),
            "NYC_1_enhanced_20260314_092653.txt"
        );
        assert_eq!(
            jsonb.file_name().unwrap(),
            "NYC_1_jsonb_20260314_092653.txt"
        );
    }

    #[tokio::test]
    async fn test_colliding_timestamp_appends_counter() {
        let dir = TempDir::new().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();

        std::fs::write(dir.path().join("NYC_1_20260314_092653.txt"), "").unwrap();
        std::fs::write(dir.path().join("NYC_1_20260314_092653_1.txt"), "").unwrap();

        let path = build_output_path(dir.path(), "NYC", 1, ProcessingMode::Standard, now).await;
        assert_eq!(path.file_name().unwrap(), "NYC_1_20260314_092653_2.txt");
    }
}
