//! Metrics and observability
//!
//! Optional Prometheus export of the per-link counters.

mod exporter;

pub use exporter::init_metrics;
