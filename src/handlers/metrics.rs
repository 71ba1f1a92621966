//! Metrics endpoint handler for Prometheus scraping.

use axum::{extract::State, http::StatusCode, response::IntoResponse};
use prometheus::TEXT_FORMAT;
use tracing::{debug, error, instrument};

use crate::sink::SinkError;
use crate::state::SharedState;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed(SinkError),
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        let MetricsError::EncodingFailed(e) = self;
        error!("Failed to encode metrics: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

/// Handler for the /metrics endpoint.
///
/// Serves whatever the gauges hold right now; scrapes never trigger a
/// collection.
#[instrument(skip(state))]
pub async fn metrics_handler(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, MetricsError> {
    debug!("Processing /metrics request");

    let body = state.sink.encode().map_err(MetricsError::EncodingFailed)?;
    Ok((
        StatusCode::OK,
        [("Content-Type", TEXT_FORMAT)],
        body,
    ))
}
