//! HTTP endpoint for Prometheus scraping.

use axum::{Router, routing::get};
use std::net::SocketAddr;
use tracing::{error, info};

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Serve `/metrics` on `addr`. Long-running; spawn in the background.
pub async fn run_http_server(addr: SocketAddr) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "failed to bind metrics endpoint");
            return;
        }
    };
    info!(%addr, "metrics endpoint listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "metrics endpoint error");
    }
}
