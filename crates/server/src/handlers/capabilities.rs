//! Capability discovery and health endpoints.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use lanvan_core::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use serde::Serialize;

/// Capabilities response.
#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    /// Sessions written to disk at the same time.
    pub max_concurrent_uploads: usize,
    /// Largest accepted request body for one chunk PUT.
    pub max_chunk_body_bytes: usize,
    /// Smallest chunk size the server suggests.
    pub min_chunk_size: usize,
    /// Largest chunk size the server suggests.
    pub max_chunk_size: usize,
    /// Largest declared file size, if limited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
    /// Supported at-rest encryption.
    pub encryption: &'static [&'static str],
    /// API version.
    pub api_version: &'static str,
}

/// GET /v1/capabilities
pub async fn get_capabilities(State(state): State<AppState>) -> Json<CapabilitiesResponse> {
    Json(CapabilitiesResponse {
        max_concurrent_uploads: state.config.upload.max_concurrent_uploads,
        max_chunk_body_bytes: state.config.server.max_chunk_body_bytes,
        min_chunk_size: MIN_CHUNK_SIZE,
        max_chunk_size: MAX_CHUNK_SIZE,
        max_file_size: state.config.upload.max_file_size,
        encryption: &[lanvan_cipher::ALGORITHM],
        api_version: "v1",
    })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub active_sessions: usize,
}

/// GET /v1/health - Verifies the upload directory is writable.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.coordinator.directory().health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        active_sessions: state.coordinator.active_sessions(),
    }))
}
