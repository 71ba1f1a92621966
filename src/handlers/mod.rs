//! HTTP endpoint handlers for the exporter.
//!
//! - `/metrics`: Prometheus text exposition of the metric sink
//! - `/health`: per-collector health table
//! - `/`: landing page

pub mod health;
pub mod metrics;
pub mod root;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use root::root_handler;
