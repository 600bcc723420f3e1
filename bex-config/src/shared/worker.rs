use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::shared::ValidationError;

/// Processing mode for a batch, selecting the detail source and output shape.
///
/// The mode stored on a batch row takes precedence; [`WorkerConfig::mode`]
/// applies to batches that carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    /// Relational details, standard output lines.
    Standard,
    /// Relational details, `_enhanced` output files.
    Enhanced,
    /// JSONB details flattened into extended output lines.
    StreamingJsonb,
}

impl ProcessingMode {
    /// Returns the filename suffix inserted between the master id and the timestamp.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            ProcessingMode::Standard => "",
            ProcessingMode::Enhanced => "_enhanced",
            ProcessingMode::StreamingJsonb => "_jsonb",
        }
    }

    /// Parses the uppercase mode tag stored on a batch row.
    pub fn from_db(value: &str) -> Option<Self> {
        match value {
            "STANDARD" => Some(ProcessingMode::Standard),
            "ENHANCED" => Some(ProcessingMode::Enhanced),
            "STREAMING_JSONB" => Some(ProcessingMode::StreamingJsonb),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Standard => "STANDARD",
            ProcessingMode::Enhanced => "ENHANCED",
            ProcessingMode::StreamingJsonb => "STREAMING_JSONB",
        }
    }
}

/// Policy applied when a single detail row fails to transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Abort the whole batch on the first bad row.
    AbortBatch,
    /// Skip the bad row, count it, and continue.
    SkipRow,
}

/// Settings for one exporter worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Cursor fetch size: rows prefetched per round trip. The sole knob
    /// controlling streaming memory.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Maximum age of a lease before another worker may reclaim the batch.
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
    /// Sleep between idle polls of the batch queue.
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Maximum number of batches processed concurrently by this worker.
    #[serde(default = "default_max_concurrent_masters")]
    pub max_concurrent_masters: u16,
    /// Directory receiving the emitted files.
    pub output_directory: PathBuf,
    /// Priority per business center, applied when a batch row carries no
    /// materialized priority. Larger values are claimed first.
    #[serde(default)]
    pub business_center_priorities: HashMap<String, i32>,
    /// Mode applied to batches whose row carries no mode attribute.
    #[serde(default = "default_mode")]
    pub mode: ProcessingMode,
    /// Per-row error handling policy.
    #[serde(default = "default_error_policy")]
    pub error_policy: ErrorPolicy,
}

impl WorkerConfig {
    pub const DEFAULT_BATCH_SIZE: u32 = 500;
    pub const DEFAULT_LEASE_TTL_SECONDS: u64 = 300;
    pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 5;
    pub const DEFAULT_MAX_CONCURRENT_MASTERS: u16 = 4;

    pub const BATCH_SIZE_RANGE: (u32, u32) = (100, 10_000);
    pub const LEASE_TTL_RANGE: (u64, u64) = (60, 3_600);
    pub const POLL_INTERVAL_RANGE: (u64, u64) = (1, 60);
    pub const MAX_CONCURRENT_MASTERS_RANGE: (u16, u16) = (1, 100);

    /// Validates worker configuration against the documented ranges.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let (min, max) = Self::BATCH_SIZE_RANGE;
        if self.batch_size < min || self.batch_size > max {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.batch_size",
                constraint: format!("must be within {min}..={max}"),
            });
        }

        let (min, max) = Self::LEASE_TTL_RANGE;
        if self.lease_ttl_seconds < min || self.lease_ttl_seconds > max {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.lease_ttl_seconds",
                constraint: format!("must be within {min}..={max}"),
            });
        }

        let (min, max) = Self::POLL_INTERVAL_RANGE;
        if self.poll_interval_seconds < min || self.poll_interval_seconds > max {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.poll_interval_seconds",
                constraint: format!("must be within {min}..={max}"),
            });
        }

        let (min, max) = Self::MAX_CONCURRENT_MASTERS_RANGE;
        if self.max_concurrent_masters < min || self.max_concurrent_masters > max {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.max_concurrent_masters",
                constraint: format!("must be within {min}..={max}"),
            });
        }

        if self.output_directory.as_os_str().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "worker.output_directory",
                constraint: "must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

fn default_batch_size() -> u32 {
    WorkerConfig::DEFAULT_BATCH_SIZE
}

fn default_lease_ttl_seconds() -> u64 {
    WorkerConfig::DEFAULT_LEASE_TTL_SECONDS
}

fn default_poll_interval_seconds() -> u64 {
    WorkerConfig::DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_max_concurrent_masters() -> u16 {
    WorkerConfig::DEFAULT_MAX_CONCURRENT_MASTERS
}

fn default_mode() -> ProcessingMode {
    ProcessingMode::Standard
}

fn default_error_policy() -> ErrorPolicy {
    ErrorPolicy::AbortBatch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> WorkerConfig {
        WorkerConfig {
            batch_size: 500,
            lease_ttl_seconds: 300,
            poll_interval_seconds: 5,
            max_concurrent_masters: 4,
            output_directory: PathBuf::from("/var/out"),
            business_center_priorities: HashMap::from([("NYC".to_string(), 100)]),
            mode: ProcessingMode::Standard,
            error_policy: ErrorPolicy::AbortBatch,
        }
    }

    #[test]
    fn test_valid_config_passes_validation() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_batch_size_below_range_is_rejected() {
        let config = WorkerConfig {
            batch_size: 50,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_ttl_above_range_is_rejected() {
        let config = WorkerConfig {
            lease_ttl_seconds: 7_200,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let config = WorkerConfig {
            max_concurrent_masters: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mode_deserializes_from_snake_case() {
        let mode: ProcessingMode = serde_json::from_str(r#""streaming_jsonb""#).unwrap();
        assert_eq!(mode, ProcessingMode::StreamingJsonb);
    }

    #[test]
    fn test_mode_file_suffixes() {
        assert_eq!(ProcessingMode::Standard.file_suffix(), "");
        assert_eq!(ProcessingMode::Enhanced.file_suffix(), "_enhanced");
        assert_eq!(ProcessingMode::StreamingJsonb.file_suffix(), "_jsonb");
    }

    #[test]
    fn test_mode_db_round_trip() {
        for mode in [
            ProcessingMode::Standard,
            ProcessingMode::Enhanced,
            ProcessingMode::StreamingJsonb,
        ] {
            assert_eq!(ProcessingMode::from_db(mode.as_str()), Some(mode));
        }
        assert_eq!(ProcessingMode::from_db("BATCH"), None);
    }
}
