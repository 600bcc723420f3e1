use serde::Deserialize;

use crate::Config;
use crate::shared::{PgConnectionConfig, PoolConfig, ValidationError, WorkerConfig};

/// Top-level configuration for the exporter daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    /// Connection settings for the source Postgres instance.
    pub pg_connection: PgConnectionConfig,
    /// State-store connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Worker loop and pipeline settings.
    pub worker: WorkerConfig,
    /// Port for the Prometheus metrics listener. `None` disables the listener.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl ExporterConfig {
    /// Validates the whole configuration tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.pool.validate()?;
        self.worker.validate()?;

        Ok(())
    }
}

impl Config for ExporterConfig {}
