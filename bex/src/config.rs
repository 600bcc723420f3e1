//! Configuration objects for the batch export engine.
//!
//! This module re-exports the shared configuration types consumed by the core.

pub use bex_config::shared::*;
