//! Telemetry bootstrap for bex services: tracing initialization and the
//! Prometheus metrics exporter.

pub mod metrics;
pub mod tracing;
