//! Archive upload endpoint.
//!
//! The request body is the complete archive. The archive format comes from
//! `?format=`, else from `Content-Type`, else it is sniffed from the payload.

use crate::{
    archive::ArchiveFormat,
    errors::AppError,
    services::pipeline::FailurePolicy,
    state::AppState,
};
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct IngestQuery {
    pub format: Option<String>,
}

/// `POST /archives`
///
/// Under the `isolate` policy the body is the extraction report. Under
/// `abort` callers only learn that the request completed.
pub async fn ingest_archive(
    State(state): State<AppState>,
    Query(q): Query<IngestQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let declared = declared_format(q.format.as_deref(), &headers)?;
    let report = state.processor.process(body, declared).await?;

    let response = match state.processor.policy() {
        FailurePolicy::Isolate => (StatusCode::OK, Json(report)).into_response(),
        FailurePolicy::Abort => (StatusCode::OK, Json(json!({ "status": "completed" }))).into_response(),
    };
    Ok(response)
}

/// Resolve the declared format. `None` means "sniff it".
pub fn declared_format(
    query: Option<&str>,
    headers: &HeaderMap,
) -> Result<Option<ArchiveFormat>, AppError> {
    if let Some(name) = query {
        return name.parse().map(Some).map_err(AppError::bad_request);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

    let format = match content_type.as_deref() {
        Some("application/zip" | "application/x-zip-compressed") => Some(ArchiveFormat::Zip),
        Some("application/x-tar") => Some(ArchiveFormat::Tar),
        Some("application/gzip" | "application/x-gzip" | "application/x-gtar" | "application/x-compressed-tar") => {
            Some(ArchiveFormat::TarGz)
        }
        _ => None,
    };
    Ok(format)
}
