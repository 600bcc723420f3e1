use std::process::ExitCode;

use bex::error::BexError;
use bex_config::LoadConfigError;
use bex_config::shared::ValidationError;
use thiserror::Error;

/// Result type for exporter operations.
pub type ExporterResult<T> = Result<T, ExporterError>;

/// Error type for the exporter service.
///
/// Wraps [`BexError`] for engine errors and provides variants for
/// infrastructure failures during startup.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] LoadConfigError),

    /// Configuration loaded but failed validation.
    #[error("configuration error: {0}")]
    Validation(#[from] ValidationError),

    /// Tracing or metrics initialization failed.
    #[error("telemetry error: {0}")]
    Telemetry(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// I/O failure during startup.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine failure after startup.
    #[error(transparent)]
    Engine(#[from] BexError),
}

impl ExporterError {
    /// Maps the error onto the documented process exit codes: `1` for fatal
    /// startup errors, `2` for unrecoverable runtime errors.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ExporterError::Engine(_) => ExitCode::from(2),
            _ => ExitCode::from(1),
        }
    }
}
