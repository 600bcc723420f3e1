use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter applied when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "bex=info,bex_exporter=info";

/// Initializes the global tracing subscriber for a bex service.
///
/// Log levels come from `RUST_LOG` when set, otherwise from the crate-level
/// default. Output is the human-readable fmt layer on stdout; structured
/// fields are preserved.
pub fn init_tracing() -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
