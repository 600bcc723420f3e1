use bex_config::load_config;
use bex_config::shared::ExporterConfig;

use crate::error::ExporterResult;

/// Loads and validates the exporter configuration.
///
/// Uses the standard configuration loading mechanism from [`bex_config`] and
/// validates the resulting [`ExporterConfig`] before returning it.
pub fn load_exporter_config() -> ExporterResult<ExporterConfig> {
    let config = load_config::<ExporterConfig>()?;
    config.validate()?;

    Ok(config)
}
