//! Published file handlers.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tokio_util::io::ReaderStream;

/// A published file as shown to clients.
#[derive(Debug, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// Response body for GET /v1/files.
#[derive(Debug, Serialize)]
pub struct ListFilesResponse {
    pub files: Vec<FileEntry>,
}

/// GET /v1/files - List published files. Temporary files never appear.
pub async fn list_files(State(state): State<AppState>) -> ApiResult<Json<ListFilesResponse>> {
    let files = state
        .coordinator
        .directory()
        .list()
        .await?
        .into_iter()
        .map(|file| FileEntry {
            name: file.name,
            size: file.size,
            modified: file.modified.and_then(|t| t.format(&Rfc3339).ok()),
        })
        .collect();
    Ok(Json(ListFilesResponse { files }))
}

/// GET /v1/files/{name} - Stream a published file.
#[tracing::instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let (file, size) = state.coordinator.directory().open(&name).await.map_err(|e| match e {
        lanvan_storage::StorageError::NotFound(_) => {
            ApiError::NotFound(format!("file {name} not found"))
        }
        other => ApiError::from(other),
    })?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}
