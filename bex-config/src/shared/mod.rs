//! Shared configuration types for bex services.

mod connection;
mod exporter;
mod pool;
mod worker;

use thiserror::Error;

pub use connection::{
    BEX_STATE_OPTIONS, BEX_STREAMING_OPTIONS, IntoConnectOptions, PgConnectionConfig,
    PgConnectionOptions,
};
pub use exporter::ExporterConfig;
pub use pool::PoolConfig;
pub use worker::{ErrorPolicy, ProcessingMode, WorkerConfig};

/// Error raised when a configuration value falls outside its documented range.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value that violates its constraint.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: &'static str,
        constraint: String,
    },
}
