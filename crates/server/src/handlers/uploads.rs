//! Upload session handlers.

use crate::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use lanvan_core::{FileDescriptor, SessionId};
use lanvan_upload::{SessionSnapshot, UploadError, UploadReport};
use serde::{Deserialize, Serialize};

/// Maximum request body size for admission requests (1 MiB).
const MAX_CREATE_BODY_SIZE: usize = 1024 * 1024;

/// Request body for POST /v1/uploads.
#[derive(Debug, Deserialize)]
pub struct CreateUploadsRequest {
    pub files: Vec<FileDescriptor>,
}

/// Per-file admission outcome, in request order.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AdmissionResponse {
    Admitted {
        session_id: SessionId,
        filename: String,
        chunk_size: usize,
        /// Base64 key for random-key encryption. Returned only here.
        #[serde(skip_serializing_if = "Option::is_none")]
        random_key: Option<String>,
    },
    Rejected {
        filename: String,
        error: ErrorResponse,
    },
}

/// Response body for POST /v1/uploads.
#[derive(Debug, Serialize)]
pub struct CreateUploadsResponse {
    pub files: Vec<AdmissionResponse>,
}

/// POST /v1/uploads - Admit a batch of files.
#[tracing::instrument(skip(state, req))]
pub async fn create_uploads(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<CreateUploadsResponse>> {
    let body: CreateUploadsRequest = {
        let bytes = axum::body::to_bytes(req.into_body(), MAX_CREATE_BODY_SIZE)
            .await
            .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))?
    };
    if body.files.is_empty() {
        return Err(ApiError::BadRequest("no files in request".to_string()));
    }

    let declared: Vec<String> = body.files.iter().map(|f| f.filename.clone()).collect();
    let results = state.coordinator.submit(body.files).await;

    let files = results
        .into_iter()
        .zip(declared)
        .map(|(result, declared)| match result {
            Ok(handle) => AdmissionResponse::Admitted {
                session_id: handle.session_id(),
                filename: handle.filename().to_string(),
                chunk_size: handle.chunk_size(),
                random_key: handle.random_key().map(|key| key.to_base64()),
            },
            Err(e) => {
                tracing::info!(filename = %declared, error = %e, "File rejected at admission");
                AdmissionResponse::Rejected {
                    filename: declared,
                    error: ApiError::from(e).to_response_body(),
                }
            }
        })
        .collect();

    Ok(Json(CreateUploadsResponse { files }))
}

/// Session state, with the report once the session has finished.
#[derive(Debug, Serialize)]
pub struct UploadStateResponse {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<UploadReport>,
}

fn parse_session_id(upload_id: &str) -> ApiResult<SessionId> {
    SessionId::parse(upload_id).map_err(|e| ApiError::BadRequest(format!("invalid upload ID: {e}")))
}

/// GET /v1/uploads/{upload_id} - Query session state.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadStateResponse>> {
    let id = parse_session_id(&upload_id)?;
    let snapshot = state.coordinator.status(id)?;
    let report = state.coordinator.report(id);
    Ok(Json(UploadStateResponse { snapshot, report }))
}

/// DELETE /v1/uploads/{upload_id} - Abort a session.
#[tracing::instrument(skip(state), fields(upload_id = %upload_id))]
pub async fn abort_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> ApiResult<Json<UploadReport>> {
    let id = parse_session_id(&upload_id)?;
    Ok(Json(state.coordinator.abort(id).await?))
}

/// Query parameters for chunk uploads.
#[derive(Debug, Default, Deserialize)]
pub struct ChunkQuery {
    /// The body ends the file.
    #[serde(default)]
    pub last: bool,
}

/// PUT /v1/uploads/{upload_id}/chunks?last=bool - Stream bytes into a session.
///
/// Body frames are forwarded as they arrive. With `last=true` the response is
/// the terminal report; otherwise it is the session state.
#[tracing::instrument(skip(state, req), fields(upload_id = %upload_id, last = query.last))]
pub async fn upload_chunk(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
    Query(query): Query<ChunkQuery>,
    req: Request,
) -> ApiResult<Response> {
    let id = parse_session_id(&upload_id)?;
    let limit = state.config.server.max_chunk_body_bytes;
    let coordinator = &state.coordinator;

    let mut body = req.into_body().into_data_stream();
    let mut received = 0usize;
    while let Some(frame) = body.next().await {
        let frame: Bytes =
            frame.map_err(|e| ApiError::BadRequest(format!("failed to read chunk: {e}")))?;
        received += frame.len();
        if received > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }
        match coordinator.push_chunk(id, frame, false).await {
            Ok(_) => {}
            // The session ended mid-body; a closing request still gets its report.
            Err(UploadError::SessionClosed(_)) if query.last => break,
            Err(e) => return Err(e.into()),
        }
    }
    tracing::debug!(bytes = received, "Chunk body forwarded");

    if query.last {
        let report = coordinator
            .push_chunk(id, Bytes::new(), true)
            .await?
            .ok_or_else(|| ApiError::Internal("closing chunk returned no report".to_string()))?;
        return Ok((StatusCode::OK, Json(report)).into_response());
    }
    let snapshot = coordinator.status(id)?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)).into_response())
}
