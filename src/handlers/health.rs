//! Health check endpoint handler.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::{debug, instrument};

use crate::state::SharedState;

// Time conversion constants
const SECONDS_PER_HOUR: f64 = 3600.0;
const MINUTES_PER_HOUR: f64 = 60.0;
const HOURS_PER_DAY: f64 = 24.0;

/// Footer text for human-readable HTTP endpoints.
pub const FOOTER_TEXT: &str = concat!("dssg-monitor ", env!("CARGO_PKG_VERSION"));

/// Handler for the /health endpoint.
///
/// Returns 503 until the first tick has completed, 200 afterwards. Collector
/// failures are reported in the body but do not change the status: the
/// exporter itself is healthy as long as the loop is running.
#[instrument(skip(state))]
pub async fn health_handler(State(state): State<SharedState>) -> impl IntoResponse {
    debug!("Processing /health request");

    let health = &state.health;
    let ticks = health.tick_count();

    let status = if ticks > 0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let failing = health.failing();
    let message = if ticks == 0 {
        "STARTING - no collection cycle completed yet".to_string()
    } else if failing.is_empty() {
        "OK".to_string()
    } else {
        format!("OK - failing collectors: {}", failing.join(", "))
    };

    let uptime_str = format_uptime(health.get_uptime_seconds());
    let table = health.render_table();

    debug!("Health check: {} - {}", status, message);
    (
        status,
        [("Content-Type", "text/plain; charset=utf-8")],
        format!("{message}\n\nUptime: {uptime_str}\n\n{table}\n{FOOTER_TEXT}\n"),
    )
}

fn format_uptime(uptime_seconds: u64) -> String {
    let uptime_hours = uptime_seconds as f64 / SECONDS_PER_HOUR;
    if uptime_hours < 1.0 {
        format!("{:.1} minutes", uptime_hours * MINUTES_PER_HOUR)
    } else if uptime_hours < HOURS_PER_DAY {
        format!("{:.1} hours", uptime_hours)
    } else {
        format!("{:.1} days", uptime_hours / HOURS_PER_DAY)
    }
}
