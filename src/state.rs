//! Application state shared with the HTTP handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::health::ExporterHealth;
use crate::sink::MetricSink;

/// Type alias for shared application state.
pub type SharedState = Arc<AppState>;

/// Read-only view of the exporter for request handlers. The collection loop
/// writes through the same `sink` and `health` handles.
pub struct AppState {
    pub sink: Arc<MetricSink>,
    pub health: Arc<ExporterHealth>,
    pub config: Arc<Config>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(sink: Arc<MetricSink>, health: Arc<ExporterHealth>, config: Arc<Config>) -> Self {
        Self {
            sink,
            health,
            config,
            start_time: Instant::now(),
        }
    }

    pub fn shared(self) -> SharedState {
        Arc::new(self)
    }
}
