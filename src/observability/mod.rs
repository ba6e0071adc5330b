//! # Observability Module
//!
//! Structured logging through `tracing` and counters through the `metrics` facade.
//! No exporter is installed here; counters are no-ops until the embedding binary
//! installs a recorder.

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
