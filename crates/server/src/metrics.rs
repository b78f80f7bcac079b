//! Prometheus scrape endpoint.
//!
//! The `/metrics` route is unauthenticated. Expose it only on trusted networks.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use lanvan_upload::metrics::encode_text;

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    match encode_text() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}
