//! Prometheus exposition endpoint.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use service::ShutdownToken;
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(serve_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Serves `/metrics` until shutdown is requested.
pub async fn serve(
    addr: SocketAddr,
    registry: Registry,
    shutdown: ShutdownToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics server listening");

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn serve_metrics(State(registry): State<Registry>) -> impl IntoResponse {
    // Checker-scoped metrics self-register in the default registry; merge
    // both so one scrape sees everything.
    let mut families = registry.gather();
    families.extend(prometheus::gather());

    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    if let Err(err) = encoder.encode(&families, &mut buf) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encoding metrics: {err}"),
        )
            .into_response();
    }

    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], buf).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::PrometheusMetrics;

    #[tokio::test]
    async fn exposes_registered_gauges() {
        let registry = Registry::new();
        let _metrics = PrometheusMetrics::new("0.1.0-test", &registry).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownToken::new();

        let server = {
            let shutdown = shutdown.clone();
            let app = router(registry);
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            })
        };

        let body = reqwest::get(format!("http://{addr}/metrics"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("anycastd_up"), "{body}");

        shutdown.request_shutdown();
        server.await.unwrap().unwrap();
    }
}
