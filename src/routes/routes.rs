//! Defines routes for archive ingestion.
//!
//! ## Structure
//! - `POST /archives`: extract an uploaded archive (body = archive bytes,
//!   optional `?format=zip|tar|tar.gz`)
//! - `GET  /documents/{*business_id}`: metadata records for an archive path
//! - `GET  /healthz`, `GET /readyz`: probes
//!
//! The wildcard `*business_id` allows nested paths like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        document_handlers::list_documents,
        health_handlers::{healthz, readyz},
        ingest_handlers::ingest_archive,
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Archive uploads larger than `max_archive_bytes` are rejected.
pub fn routes(max_archive_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/archives",
            post(ingest_archive).layer(DefaultBodyLimit::max(max_archive_bytes)),
        )
        .route("/documents/{*business_id}", get(list_documents))
}
