//! Shared handler state.

use crate::services::{
    file_processor::FileProcessor, metadata_store::SqliteMetadataStore,
    object_store::LocalObjectStore,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Long-lived handles shared by every request. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<FileProcessor>,
    pub documents: SqliteMetadataStore,
    pub objects: Arc<LocalObjectStore>,
    pub db: Arc<SqlitePool>,
}
