//! Scrape server: binds the listener once and serves the handlers until the
//! stop signal fires.

use axum::{routing::get, Router};
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::handlers::{health_handler, metrics_handler, root_handler};
use crate::state::SharedState;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Binds the scrape listener. Failure here is fatal for the exporter.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Routes for the scrape server.
pub fn router(state: SharedState) -> Router {
    let mut app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler));

    if state.config.health_enabled() {
        app = app.route("/health", get(health_handler));
    }

    app.with_state(state)
}

/// Serves on an already bound listener until `shutdown` turns `true`.
pub async fn serve(
    listener: TcpListener,
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    if let Ok(addr) = listener.local_addr() {
        info!("dssg-monitor listening on http://{}", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the server.
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(ServerError::Serve)?;

    info!("HTTP server stopped");
    Ok(())
}
