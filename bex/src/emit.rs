//! File-emission state machine.
//!
//! An emitter owns one output file and walks it through
//! `Init -> HeaderWritten -> Body -> TrailerWritten -> Closed`, keeping the
//! running record count and fixed-point amount total that land in the
//! trailer. Calling an operation out of order is a programming error and
//! surfaces as an invalid-state error rather than corrupting the file.
//!
//! The header carries `0` as its record-count placeholder; the trailer is
//! authoritative. Emission is streaming and never pre-scans the batch.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::warn;

use crate::error::{BexError, BexResult, ErrorKind};
use crate::types::OutputRow;

/// The output field delimiter.
pub const DELIMITER: char = '|';

/// Capacity of the buffered writer wrapping the output file.
const WRITER_CAPACITY: usize = 64 * 1024;

/// Fields rendered into the HEADER line.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub master_id: i64,
    pub business_center: String,
    pub business_date: DateTime<Utc>,
}

/// Emitter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmitterState {
    Init,
    HeaderWritten,
    Body,
    TrailerWritten,
    Closed,
}

impl EmitterState {
    fn as_str(&self) -> &'static str {
        match self {
            EmitterState::Init => "init",
            EmitterState::HeaderWritten => "header_written",
            EmitterState::Body => "body",
            EmitterState::TrailerWritten => "trailer_written",
            EmitterState::Closed => "closed",
        }
    }
}

/// Writes one batch's header/detail/trailer file with running aggregates.
pub struct FileEmitter {
    path: PathBuf,
    state: EmitterState,
    writer: Option<BufWriter<File>>,
    record_count: u64,
    total_amount: Decimal,
}

impl FileEmitter {
    /// Creates an emitter for the given output path without touching the
    /// filesystem yet.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            state: EmitterState::Init,
            writer: None,
            record_count: 0,
            total_amount: Decimal::ZERO,
        }
    }

    /// Creates the output file and writes the HEADER line.
    ///
    /// Fails if the file already exists: filenames are unique by
    /// construction and an existing file means a collision upstream.
    pub async fn open(&mut self, header: &FileHeader) -> BexResult<()> {
        self.expect_state(EmitterState::Init, "init")?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;
        let mut writer = BufWriter::with_capacity(WRITER_CAPACITY, file);

        let line = format!(
            "HEADER{d}{master_id}{d}{center}{d}{date}{d}0\n",
            d = DELIMITER,
            master_id = header.master_id,
            center = header.business_center,
            date = header.business_date.format("%Y%m%d"),
        );
        if let Err(err) = writer.write_all(line.as_bytes()).await {
            drop(writer);
            let _ = tokio::fs::remove_file(&self.path).await;
            return Err(err.into());
        }

        self.writer = Some(writer);
        self.state = EmitterState::HeaderWritten;

        Ok(())
    }

    /// Appends one detail line and folds it into the running aggregates.
    pub async fn write_detail(&mut self, row: &OutputRow) -> BexResult<()> {
        if self.state != EmitterState::HeaderWritten && self.state != EmitterState::Body {
            return Err(self.invalid_state("header_written or body"));
        }

        let Some(writer) = self.writer.as_mut() else {
            return Err(self.invalid_state("header_written or body"));
        };
        writer.write_all(row.line.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        self.record_count += 1;
        self.total_amount += row.amount;
        self.state = EmitterState::Body;

        Ok(())
    }

    /// Writes the TRAILER line, flushes and closes the file.
    ///
    /// Idempotent: closing a closed emitter is a no-op.
    pub async fn close(&mut self) -> BexResult<()> {
        if self.state == EmitterState::Closed {
            return Ok(());
        }

        if self.state != EmitterState::HeaderWritten && self.state != EmitterState::Body {
            return Err(self.invalid_state("header_written or body"));
        }

        let Some(mut writer) = self.writer.take() else {
            return Err(self.invalid_state("header_written or body"));
        };

        let line = format!(
            "TRAILER{d}{count}{d}{total:.2}\n",
            d = DELIMITER,
            count = self.record_count,
            total = self.total_amount.round_dp(2),
        );
        writer.write_all(line.as_bytes()).await?;
        self.state = EmitterState::TrailerWritten;

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        self.state = EmitterState::Closed;

        Ok(())
    }

    /// Closes the underlying stream and deletes the file.
    ///
    /// Usable from any state: on a pipeline error it discards the partial
    /// file, and after a lost lease it discards the completed one.
    pub async fn abort(&mut self) {
        let had_file = self.state != EmitterState::Init;

        // Dropping the writer discards buffered data without flushing.
        self.writer = None;
        self.state = EmitterState::Closed;

        if had_file
            && let Err(err) = tokio::fs::remove_file(&self.path).await
        {
            warn!(path = %self.path.display(), error = %err, "failed to delete aborted output file");
        }
    }

    /// The output path this emitter writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detail lines written so far.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Fixed-point sum of the amounts written so far.
    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    fn expect_state(&self, expected: EmitterState, label: &'static str) -> BexResult<()> {
        if self.state != expected {
            return Err(self.invalid_state(label));
        }

        Ok(())
    }

    fn invalid_state(&self, expected: &'static str) -> BexError {
        BexError::new(ErrorKind::InvalidEmitterState {
            expected,
            actual: self.state.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn header() -> FileHeader {
        FileHeader {
            master_id: 1,
            business_center: "NYC".to_string(),
            business_date: Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap(),
        }
    }

    fn row(detail_id: i64, amount: &str, line: &str) -> OutputRow {
        OutputRow {
            detail_id,
            amount: amount.parse().unwrap(),
            line: line.to_string(),
        }
    }

    #[tokio::test]
    async fn test_emits_header_details_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("NYC_1_20260314_000000.txt");

        let mut emitter = FileEmitter::new(path.clone());
        emitter.open(&header()).await.unwrap();
        emitter
            .write_detail(&row(1, "10.00", "TXN|1|ACC001|Ada|10.00|USD|coffee|20260314092653"))
            .await
            .unwrap();
        emitter
            .write_detail(&row(2, "5.50", "TXN|2|ACC002|Bob|5.50|USD|tea|20260314092654"))
            .await
            .unwrap();
        emitter.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "HEADER|1|NYC|20260314|0");
        assert!(lines[1].starts_with("TXN|1|"));
        assert!(lines[2].starts_with("TXN|2|"));
        assert_eq!(lines[3], "TRAILER|2|15.50");
    }

    #[tokio::test]
    async fn test_empty_batch_emits_header_and_zero_trailer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");

        let mut emitter = FileEmitter::new(path.clone());
        emitter.open(&header()).await.unwrap();
        emitter.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "HEADER|1|NYC|20260314|0\nTRAILER|0|0.00\n");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("idempotent.txt");

        let mut emitter = FileEmitter::new(path.clone());
        emitter.open(&header()).await.unwrap();
        emitter.close().await.unwrap();
        emitter.close().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("TRAILER").count(), 1);
    }

    #[tokio::test]
    async fn test_write_before_open_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut emitter = FileEmitter::new(dir.path().join("invalid.txt"));

        let err = emitter
            .write_detail(&row(1, "1.00", "TXN|1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::InvalidEmitterState { actual: "init", .. }
        ));
    }

    #[tokio::test]
    async fn test_double_open_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut emitter = FileEmitter::new(dir.path().join("double.txt"));

        emitter.open(&header()).await.unwrap();
        assert!(emitter.open(&header()).await.is_err());
    }

    #[tokio::test]
    async fn test_abort_deletes_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.txt");

        let mut emitter = FileEmitter::new(path.clone());
        emitter.open(&header()).await.unwrap();
        emitter
            .write_detail(&row(1, "1.00", "TXN|1|ACC|A|1.00|USD|x|20260314092653"))
            .await
            .unwrap();
        emitter.abort().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_abort_after_close_deletes_completed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lost_lease.txt");

        let mut emitter = FileEmitter::new(path.clone());
        emitter.open(&header()).await.unwrap();
        emitter.close().await.unwrap();
        emitter.abort().await;

        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_running_aggregates_track_writes() {
        let dir = TempDir::new().unwrap();
        let mut emitter = FileEmitter::new(dir.path().join("totals.txt"));

        emitter.open(&header()).await.unwrap();
        emitter
            .write_detail(&row(1, "0.10", "TXN|1|ACC|A|0.10|USD|x|20260314092653"))
            .await
            .unwrap();
        emitter
            .write_detail(&row(2, "0.20", "TXN|2|ACC|B|0.20|USD|y|20260314092654"))
            .await
            .unwrap();

        assert_eq!(emitter.record_count(), 2);
        assert_eq!(emitter.total_amount(), "0.30".parse().unwrap());
    }

    #[tokio::test]
    async fn test_open_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("existing.txt");
        std::fs::write(&path, "already here").unwrap();

        let mut emitter = FileEmitter::new(path);
        assert!(emitter.open(&header()).await.is_err());
    }
}
