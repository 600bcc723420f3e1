//! Core value types of the batch export engine.

mod transaction;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::ProcessingMode;

pub use transaction::{Customer, Item, Merchant, TransactionData};

/// Lifecycle status of a batch in the store.
///
/// `PENDING -> PROCESSING -> {COMPLETED | FAILED}`; a stale lease returns
/// the batch to `PENDING` via the reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Returns the uppercase tag stored on the batch row.
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
        }
    }
}

/// An exclusive, time-bounded claim by one worker on one batch.
///
/// Holding a lease authorizes exactly one worker to stream, emit and
/// finalize the batch; finalize operations re-verify ownership in the store.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The claimed batch.
    pub master_id: i64,
    /// Business center tag of the batch, used in output naming.
    pub business_center: String,
    /// Per-batch processing mode, when materialized on the row.
    pub mode: Option<ProcessingMode>,
    /// Identity of the worker holding this lease.
    pub worker_id: String,
}

/// A single input record belonging to a batch.
///
/// In JSONB mode `transaction_payload` carries the raw text of the
/// semi-structured column; decoding happens in the transformer so that a
/// malformed payload stays a per-row failure.
#[derive(Debug, Clone)]
pub struct Detail {
    pub detail_id: i64,
    pub master_id: i64,
    pub record_type: String,
    pub account_number: String,
    pub customer_name: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub transaction_date: DateTime<Utc>,
    pub transaction_payload: Option<String>,
}

/// The flattened projection emitted for one detail.
///
/// `line` is the fully rendered detail line without the trailing newline;
/// `amount` feeds the emitter's running fixed-point total.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub detail_id: i64,
    pub amount: Decimal,
    pub line: String,
}

/// Outcome of one fully processed batch, reported by the batch processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Detail lines written to the output file.
    pub rows_emitted: u64,
    /// Rows dropped under the skip-row error policy.
    pub rows_skipped: u64,
}
