use std::time::Duration;

use bex::claim::ClaimManager;
use bex::concurrency::shutdown::create_shutdown_channel;
use bex::store::create_state_pool;
use bex::worker::{Worker, generate_worker_id};
use bex_config::shared::{ExporterConfig, PgConnectionConfig, PoolConfig, WorkerConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

use crate::error::ExporterResult;

/// Drain budget for in-flight batches after SIGTERM.
const SIGTERM_DRAIN: Duration = Duration::from_secs(30);

/// Drain budget after SIGINT; interactive stops get a short grace.
const SIGINT_DRAIN: Duration = Duration::from_secs(5);

/// Starts the exporter worker with the provided configuration.
///
/// Builds the state pool and claim manager, wires the shutdown channel to
/// SIGTERM/SIGINT, and runs the worker poll loop until it drains.
pub async fn start_exporter_with_config(config: ExporterConfig) -> ExporterResult<()> {
    info!("starting exporter service");

    log_config(&config);

    tokio::fs::create_dir_all(&config.worker.output_directory).await?;

    let pool = create_state_pool(&config.pg_connection, &config.pool);

    let worker_id = generate_worker_id();
    let claims = ClaimManager::new(
        pool,
        worker_id.clone(),
        &config.worker.business_center_priorities,
        Duration::from_secs(config.worker.lease_ttl_seconds),
    );

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let worker = Worker::new(claims, config.pg_connection.clone(), config.worker, shutdown_rx);

    info!(worker_id = %worker_id, "worker identity assigned");

    // Listen for SIGTERM (sent by orchestrators before SIGKILL) and SIGINT.
    // Both stop claiming and drain in-flight batches; SIGINT drains with a
    // shorter deadline.
    let shutdown_handle = tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        let drain = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint received, shutting down with short drain");
                SIGINT_DRAIN
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down");
                SIGTERM_DRAIN
            }
        };

        if let Err(err) = shutdown_tx.shutdown(drain) {
            warn!(error = ?err, "failed to send shutdown signal");
        }
    });

    let result = worker.run().await;

    // The worker may have stopped on its own; the signal task is no longer
    // needed either way.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("exporter service stopped");

    Ok(())
}

fn log_config(config: &ExporterConfig) {
    log_pg_connection_config(&config.pg_connection);
    log_pool_config(&config.pool);
    log_worker_config(&config.worker);
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        "source postgres connection config",
    );
}

fn log_pool_config(config: &PoolConfig) {
    debug!(
        max_pool_size = config.max_pool_size,
        min_idle = config.min_idle,
        connection_timeout_ms = config.connection_timeout_ms,
        "state pool config"
    );
}

fn log_worker_config(config: &WorkerConfig) {
    debug!(
        batch_size = config.batch_size,
        lease_ttl_seconds = config.lease_ttl_seconds,
        poll_interval_seconds = config.poll_interval_seconds,
        max_concurrent_masters = config.max_concurrent_masters,
        output_directory = %config.output_directory.display(),
        mode = config.mode.as_str(),
        "worker config"
    );
}
