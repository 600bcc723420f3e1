//! Metric name and label constants emitted by the engine.
//!
//! All metrics carry the worker id as a label so that fleet dashboards can
//! attribute throughput and failures to individual worker processes.

/// Counter: batches successfully claimed.
pub const BEX_BATCHES_CLAIMED_TOTAL: &str = "bex_batches_claimed_total";

/// Counter: batches finalized as completed.
pub const BEX_BATCHES_COMPLETED_TOTAL: &str = "bex_batches_completed_total";

/// Counter: batches finalized as failed.
pub const BEX_BATCHES_FAILED_TOTAL: &str = "bex_batches_failed_total";

/// Counter: stale leases returned to pending by this worker's reaper.
pub const BEX_LEASES_REAPED_TOTAL: &str = "bex_leases_reaped_total";

/// Counter: detail lines written to output files.
pub const BEX_ROWS_EMITTED_TOTAL: &str = "bex_rows_emitted_total";

/// Counter: detail rows skipped under the skip-row error policy.
pub const BEX_ROWS_SKIPPED_TOTAL: &str = "bex_rows_skipped_total";

/// Gauge: batches currently in flight on this worker.
pub const BEX_BATCHES_IN_FLIGHT: &str = "bex_batches_in_flight";

/// Label carrying the worker identity.
pub const WORKER_ID_LABEL: &str = "worker_id";
