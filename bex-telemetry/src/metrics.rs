use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

// Global cache for the installed Prometheus handle.
//
// [`PrometheusBuilder::install_recorder`] installs a global metrics recorder
// and any later call fails, but tests may initialize telemetry more than
// once, so the first handle is cached and handed back on re-initialization.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Interval between upkeep passes on the Prometheus handle.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Initializes metrics with an automatic HTTP listener on the given port.
///
/// Installs the global metrics recorder and starts an HTTP server on
/// `[::]:{port}/metrics` for Prometheus scraping. A background task
/// periodically runs upkeep to avoid unbounded memory growth from
/// histogram samples.
pub fn init_metrics(port: u16) -> Result<(), BuildError> {
    let builder = PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port));

    builder.install()?;

    Ok(())
}

/// Initializes metrics without a listener and returns a render handle.
///
/// For embedding the metrics endpoint into an existing HTTP surface, or for
/// tests that want to inspect rendered metrics directly.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut prometheus_handle = PROMETHEUS_HANDLE.lock().unwrap();

    if let Some(handle) = &*prometheus_handle {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *prometheus_handle = Some(handle.clone());

    let handle_clone = handle.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            handle_clone.run_upkeep();
        }
    });

    Ok(handle)
}
