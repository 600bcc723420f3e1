use serde::Deserialize;

use crate::shared::ValidationError;

/// Connection pool sizing and lifetime settings for state-store operations.
///
/// Cursor streams do not draw from this pool; each stream reserves its own
/// dedicated connection for its whole lifetime.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// Minimum number of idle connections kept open.
    #[serde(default = "default_min_idle")]
    pub min_idle: u32,
    /// Maximum time to wait for a connection from the pool.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Idle time after which a pooled connection is closed.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Maximum lifetime of any pooled connection.
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
}

impl PoolConfig {
    pub const DEFAULT_MAX_POOL_SIZE: u32 = 10;
    pub const DEFAULT_MIN_IDLE: u32 = 1;
    pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;
    pub const DEFAULT_MAX_LIFETIME_MS: u64 = 1_800_000;

    /// Validates pool configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_pool_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pool.max_pool_size",
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.min_idle > self.max_pool_size {
            return Err(ValidationError::InvalidFieldValue {
                field: "pool.min_idle",
                constraint: "must not exceed pool.max_pool_size".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: Self::DEFAULT_MAX_POOL_SIZE,
            min_idle: Self::DEFAULT_MIN_IDLE,
            connection_timeout_ms: Self::DEFAULT_CONNECTION_TIMEOUT_MS,
            idle_timeout_ms: Self::DEFAULT_IDLE_TIMEOUT_MS,
            max_lifetime_ms: Self::DEFAULT_MAX_LIFETIME_MS,
        }
    }
}

fn default_max_pool_size() -> u32 {
    PoolConfig::DEFAULT_MAX_POOL_SIZE
}

fn default_min_idle() -> u32 {
    PoolConfig::DEFAULT_MIN_IDLE
}

fn default_connection_timeout_ms() -> u64 {
    PoolConfig::DEFAULT_CONNECTION_TIMEOUT_MS
}

fn default_idle_timeout_ms() -> u64 {
    PoolConfig::DEFAULT_IDLE_TIMEOUT_MS
}

fn default_max_lifetime_ms() -> u64 {
    PoolConfig::DEFAULT_MAX_LIFETIME_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_min_idle_above_max_is_rejected() {
        let config = PoolConfig {
            min_idle: 20,
            max_pool_size: 10,
            ..PoolConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
