//! Metadata store for extracted files, backed by SQLite.
//!
//! Records are keyed by `business_id` (the archive path). The column is
//! indexed for lookups but deliberately not unique.

use crate::models::document::DocumentRecord;
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("record `{0}` already exists")]
    DuplicateRecord(Uuid),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Persists one metadata record per extracted file.
#[async_trait]
pub trait MetadataRecorder: Send + Sync {
    async fn create(&self, record: &DocumentRecord) -> MetadataResult<()>;
}

#[derive(Clone)]
pub struct SqliteMetadataStore {
    /// Shared SQLite connection pool.
    db: Arc<SqlitePool>,
}

impl SqliteMetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// All records stored under `business_id`, oldest first.
    pub async fn find_by_business_id(&self, business_id: &str) -> MetadataResult<Vec<DocumentRecord>> {
        let records = sqlx::query_as::<_, DocumentRecord>(
            "SELECT record_id, business_id, display_name, description, size_bytes,
                    completed, created_at
             FROM documents
             WHERE business_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(business_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl MetadataRecorder for SqliteMetadataStore {
    async fn create(&self, record: &DocumentRecord) -> MetadataResult<()> {
        let result = sqlx::query(
            "INSERT INTO documents (
                record_id, business_id, display_name, description,
                size_bytes, completed, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.record_id)
        .bind(&record.business_id)
        .bind(&record.display_name)
        .bind(&record.description)
        .bind(record.size_bytes)
        .bind(record.completed)
        .bind(record.created_at)
        .execute(&*self.db)
        .await;

        match result {
            Ok(_) => {
                debug!(business_id = %record.business_id, record_id = %record.record_id, "recorded document");
                Ok(())
            }
            Err(err) if is_unique_violation(&err) => {
                Err(MetadataError::DuplicateRecord(record.record_id))
            }
            Err(err) => Err(MetadataError::Sqlx(err)),
        }
    }
}

/// Create the schema if it does not exist yet. Safe to run on every start.
pub async fn run_migrations(db: &SqlitePool) -> MetadataResult<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}
