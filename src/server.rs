//! HTTP server for metrics and Kubernetes probes
//!
//! Exposes:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe
//! - `/readyz` - Readiness probe

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Serve metrics and probe endpoints on the given address until the process
/// shuts down.
pub async fn serve(addr: SocketAddr, registry: Arc<Registry>) -> std::io::Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(probe_handler))
        .route("/readyz", get(probe_handler))
        .with_state(registry);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");
    axum::serve(listener, app).await
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain".to_string())],
            format!("failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

async fn probe_handler() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    #[tokio::test]
    async fn test_metrics_endpoint_renders_registered_metrics() {
        let registry = Arc::new(Registry::new());
        let counter = IntCounter::new("valet_test_total", "Test counter.").unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let response = metrics_handler(State(registry)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("valet_test_total 1"));
    }

    #[tokio::test]
    async fn test_probes_always_succeed() {
        assert_eq!(probe_handler().await, StatusCode::OK);
    }
}
