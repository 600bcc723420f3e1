//! Batch exporter service binary.
//!
//! Initializes and runs one worker process of the distributed batch export
//! engine: claims pending batches from the shared queue, streams their
//! details and emits one delimited file per batch. Includes telemetry and
//! graceful shutdown with drain deadlines.

use std::process::ExitCode;

use crate::config::load_exporter_config;
use crate::core::start_exporter_with_config;
use crate::error::{ExporterError, ExporterResult};

mod config;
mod core;
mod error;

/// Entry point for the exporter service.
///
/// Loads configuration, initializes tracing and metrics, starts the async
/// runtime, and launches the worker. Startup failures exit with code 1,
/// unrecoverable runtime failures with code 2.
fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("bex-exporter failed: {err}");
            err.exit_code()
        }
    }
}

fn run() -> ExporterResult<()> {
    let exporter_config = load_exporter_config()?;

    bex_telemetry::tracing::init_tracing()
        .map_err(|err| ExporterError::Telemetry(Box::new(err)))?;

    if let Some(port) = exporter_config.metrics_port {
        bex_telemetry::metrics::init_metrics(port)
            .map_err(|err| ExporterError::Telemetry(Box::new(err)))?;
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(start_exporter_with_config(exporter_config))?;

    Ok(())
}
