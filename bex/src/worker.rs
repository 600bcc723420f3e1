//! Worker poll loop: claims batches, dispatches batch tasks, reaps stale
//! leases and drains on shutdown.
//!
//! One worker process runs one loop. In-flight batches live in a
//! [`JoinSet`], bounded by a [`Semaphore`] of `max_concurrent_masters`
//! permits; each batch task holds one permit for its whole run. Priority is
//! expressed entirely through the claim ordering, never inside the worker.
//! Idle polls sleep with jitter so a fleet of workers spreads its load on
//! the store.

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use rand::Rng;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use crate::claim::ClaimManager;
use crate::concurrency::shutdown::ShutdownRx;
use crate::config::{PgConnectionConfig, WorkerConfig};
use crate::error::{BexError, BexResult, ErrorKind};
use crate::metrics::{
    BEX_BATCHES_CLAIMED_TOTAL, BEX_BATCHES_COMPLETED_TOTAL, BEX_BATCHES_FAILED_TOTAL,
    BEX_BATCHES_IN_FLIGHT, BEX_LEASES_REAPED_TOTAL, BEX_ROWS_EMITTED_TOTAL,
    BEX_ROWS_SKIPPED_TOTAL, WORKER_ID_LABEL,
};
use crate::processor::BatchProcessor;
use crate::store::{jittered, with_store_retry};
use crate::types::BatchSummary;

/// How often stale leases are reaped, as a multiple of the lease TTL.
const REAP_INTERVAL_TTL_MULTIPLE: u32 = 4;

/// Grace period granted to cancelled batch tasks before they are aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Base backoff after a claim attempt fails even with store retries.
const CLAIM_FAILURE_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Cap on the claim-failure backoff.
const CLAIM_FAILURE_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Generates a stable identity for this worker process.
///
/// The identity attributes leases in the store, so it must differ across
/// processes and across restarts of the same host.
pub fn generate_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    let token = Uuid::new_v4().simple().to_string();

    format!("{host}-{}-{}", std::process::id(), &token[..8])
}

/// A single worker process: owns the claim manager, a processor per batch
/// task, and the poll loop tying them together.
pub struct Worker {
    claims: ClaimManager,
    connection_config: PgConnectionConfig,
    config: Arc<WorkerConfig>,
    shutdown_rx: ShutdownRx,
    cancel_tx: watch::Sender<bool>,
}

impl Worker {
    pub fn new(
        claims: ClaimManager,
        connection_config: PgConnectionConfig,
        config: WorkerConfig,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);

        Self {
            claims,
            connection_config,
            config: Arc::new(config),
            shutdown_rx,
            cancel_tx,
        }
    }

    /// Runs the poll loop until shutdown, then drains in-flight batches.
    pub async fn run(mut self) -> BexResult<()> {
        info!(
            worker_id = self.claims.worker_id(),
            max_concurrent_masters = self.config.max_concurrent_masters,
            poll_interval_secs = self.config.poll_interval_seconds,
            "starting worker poll loop"
        );

        let mut join_set: JoinSet<(i64, BexResult<BatchSummary>)> = JoinSet::new();
        let permits = Arc::new(Semaphore::new(usize::from(
            self.config.max_concurrent_masters,
        )));

        let reap_interval =
            Duration::from_secs(self.config.lease_ttl_seconds) * REAP_INTERVAL_TTL_MULTIPLE;
        // Reap once at startup so batches abandoned before a full restart
        // become claimable immediately.
        let mut next_reap = Instant::now();

        let mut claim_backoff = CLAIM_FAILURE_BASE_BACKOFF;

        while !self.shutdown_rx.is_shutdown() {
            if Instant::now() >= next_reap {
                self.reap_stale().await;
                next_reap = Instant::now() + reap_interval;
            }

            while let Some(result) = join_set.try_join_next() {
                self.handle_batch_result(result.map_err(join_error_to_bex))?;
            }
            self.update_in_flight(join_set.len());

            let mut sleep_for = self.idle_delay();

            if let Ok(permit) = permits.clone().try_acquire_owned() {
                let claims = self.claims.clone();
                match with_store_retry("claim_next", || claims.claim_next()).await {
                    Ok(Some(lease)) => {
                        claim_backoff = CLAIM_FAILURE_BASE_BACKOFF;

                        counter!(
                            BEX_BATCHES_CLAIMED_TOTAL,
                            WORKER_ID_LABEL => self.claims.worker_id().to_string()
                        )
                        .increment(1);

                        let mut processor = BatchProcessor::new(
                            self.connection_config.clone(),
                            self.claims.clone(),
                            self.config.clone(),
                            self.cancel_tx.subscribe(),
                        );

                        let span = tracing::info_span!(
                            "batch_processor",
                            master_id = lease.master_id,
                            worker_id = self.claims.worker_id()
                        );
                        join_set.spawn(
                            async move {
                                // Held until the batch task finishes, so the
                                // permit count is the in-flight bound.
                                let _permit = permit;

                                let master_id = lease.master_id;
                                let result = processor.process(&lease).await;
                                (master_id, result)
                            }
                            .instrument(span),
                        );
                        self.update_in_flight(join_set.len());

                        // Claim again immediately; idle sleeping is only for
                        // an empty queue or a full worker.
                        continue;
                    }
                    Ok(None) => {
                        debug!("no pending batches, sleeping");
                        claim_backoff = CLAIM_FAILURE_BASE_BACKOFF;
                    }
                    Err(err) => {
                        error!(error = %err, "claim attempt failed, backing off");
                        sleep_for = jittered(claim_backoff);
                        claim_backoff = (claim_backoff * 2).min(CLAIM_FAILURE_MAX_BACKOFF);
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = self.shutdown_rx.wait_for_shutdown() => {}
                // On an empty join set the pattern misses and the branch is
                // disabled for this poll round.
                Some(result) = join_set.join_next() => {
                    self.handle_batch_result(result.map_err(join_error_to_bex))?;
                    self.update_in_flight(join_set.len());
                }
            }
        }

        let drain_budget = self.shutdown_rx.wait_for_shutdown().await;
        self.drain(join_set, drain_budget).await
    }

    /// Waits for in-flight batches to finish within the drain budget, then
    /// cancels and finally aborts whatever remains.
    async fn drain(
        &mut self,
        mut join_set: JoinSet<(i64, BexResult<BatchSummary>)>,
        drain_budget: Duration,
    ) -> BexResult<()> {
        if join_set.is_empty() {
            info!("worker stopped with no batches in flight");
            return Ok(());
        }

        info!(
            in_flight = join_set.len(),
            drain_secs = drain_budget.as_secs(),
            "draining in-flight batches"
        );

        let graceful = tokio::time::timeout(drain_budget, async {
            while let Some(result) = join_set.join_next().await {
                self.handle_batch_result(result.map_err(join_error_to_bex))?;
            }
            Ok::<(), BexError>(())
        })
        .await;

        match graceful {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    in_flight = join_set.len(),
                    "drain deadline exceeded, cancelling in-flight batches"
                );
                let _ = self.cancel_tx.send(true);

                let cancelled = tokio::time::timeout(CANCEL_GRACE, async {
                    while let Some(result) = join_set.join_next().await {
                        self.handle_batch_result(result.map_err(join_error_to_bex))?;
                    }
                    Ok::<(), BexError>(())
                })
                .await;

                if cancelled.is_err() {
                    warn!("cancellation grace exceeded, aborting remaining batch tasks");
                    join_set.abort_all();
                    while join_set.join_next().await.is_some() {}
                }
            }
        }

        self.update_in_flight(0);
        info!("worker drained");

        Ok(())
    }

    /// Records the outcome of one finished batch task.
    ///
    /// Batch failures are terminal for the batch, not for the worker: the
    /// lease is already finalized or left for the reaper. A panic is the
    /// only result that stops the loop.
    fn handle_batch_result(&self, result: BexResult<(i64, BexResult<BatchSummary>)>) -> BexResult<()> {
        let worker_id = self.claims.worker_id().to_string();

        match result {
            Ok((master_id, Ok(summary))) => {
                counter!(BEX_BATCHES_COMPLETED_TOTAL, WORKER_ID_LABEL => worker_id.clone())
                    .increment(1);
                counter!(BEX_ROWS_EMITTED_TOTAL, WORKER_ID_LABEL => worker_id.clone())
                    .increment(summary.rows_emitted);
                counter!(BEX_ROWS_SKIPPED_TOTAL, WORKER_ID_LABEL => worker_id)
                    .increment(summary.rows_skipped);

                debug!(master_id, "batch task finished");

                Ok(())
            }
            Ok((master_id, Err(err))) => {
                counter!(BEX_BATCHES_FAILED_TOTAL, WORKER_ID_LABEL => worker_id).increment(1);
                error!(master_id, error = %err, "batch task failed");

                Ok(())
            }
            Err(err) if matches!(err.kind(), ErrorKind::Cancelled) => {
                warn!("batch task was cancelled before finishing");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "batch task panicked");
                Err(err)
            }
        }
    }

    /// Runs the reaper, returning abandoned batches to the pending pool.
    async fn reap_stale(&self) {
        let claims = self.claims.clone();
        match with_store_retry("reap_stale", || claims.reap_stale()).await {
            Ok(0) => debug!("no stale leases to reap"),
            Ok(reaped) => {
                counter!(
                    BEX_LEASES_REAPED_TOTAL,
                    WORKER_ID_LABEL => self.claims.worker_id().to_string()
                )
                .increment(reaped);
                info!(reaped, "returned stale leases to pending");
            }
            Err(err) => warn!(error = %err, "reaping stale leases failed"),
        }
    }

    fn update_in_flight(&self, in_flight: usize) {
        gauge!(
            BEX_BATCHES_IN_FLIGHT,
            WORKER_ID_LABEL => self.claims.worker_id().to_string()
        )
        .set(in_flight as f64);
    }

    /// Idle poll delay with jitter in `[0, poll_interval / 2]`.
    fn idle_delay(&self) -> Duration {
        let base = Duration::from_secs(self.config.poll_interval_seconds);
        let jitter = rand::rng().random_range(0.0..=base.as_secs_f64() / 2.0);

        base + Duration::from_secs_f64(jitter)
    }
}

/// Maps a task join failure onto the error taxonomy.
fn join_error_to_bex(err: tokio::task::JoinError) -> BexError {
    if err.is_cancelled() {
        BexError::cancelled()
    } else {
        BexError::with_source(ErrorKind::BatchTaskPanicked, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::shutdown::create_shutdown_channel;
    use crate::config::{PgConnectionConfig, PoolConfig, WorkerConfig};
    use crate::store::create_state_pool;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn test_worker() -> Worker {
        let connection = PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            name: "bex".to_string(),
            username: "bex".to_string(),
            password: None,
        };
        let config = WorkerConfig {
            batch_size: 500,
            lease_ttl_seconds: 300,
            poll_interval_seconds: 10,
            max_concurrent_masters: 4,
            output_directory: PathBuf::from("/tmp"),
            business_center_priorities: HashMap::new(),
            mode: crate::config::ProcessingMode::Standard,
            error_policy: crate::config::ErrorPolicy::AbortBatch,
        };

        // The pool connects lazily, so no database is required here.
        let pool = create_state_pool(&connection, &PoolConfig::default());
        let claims = ClaimManager::new(
            pool,
            generate_worker_id(),
            &config.business_center_priorities,
            Duration::from_secs(config.lease_ttl_seconds),
        );

        let (_, shutdown_rx) = create_shutdown_channel();
        Worker::new(claims, connection, config, shutdown_rx)
    }

    #[test]
    fn test_worker_ids_are_unique_per_call() {
        let first = generate_worker_id();
        let second = generate_worker_id();

        assert_ne!(first, second);
        assert!(first.contains(&std::process::id().to_string()));
    }

    #[tokio::test]
    async fn test_idle_delay_jitter_stays_within_bounds() {
        let worker = test_worker();

        for _ in 0..100 {
            let delay = worker.idle_delay();
            assert!(delay >= Duration::from_secs(10));
            assert!(delay <= Duration::from_secs(15));
        }
    }
}
