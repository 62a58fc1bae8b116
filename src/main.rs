use anyhow::{Context, Result};
use axum::Router;
use bytes::Bytes;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod archive;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod test_support;

use config::{AppConfig, RunMode};
use services::{
    file_processor::{FileProcessor, ReaderRegistry},
    metadata_store::{self, SqliteMetadataStore},
    object_store::LocalObjectStore,
    pipeline::ExtractionPipeline,
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting archive-ingest with config: {:?}", cfg);

    // --- Destination container ---
    let objects = Arc::new(
        LocalObjectStore::new(&cfg.storage_dir, &cfg.container)
            .context("invalid destination container")?,
    );
    if !objects.container_root().exists() {
        objects.ensure_container().await?;
        tracing::info!(
            "Created container directory at {}",
            objects.container_root().display()
        );
    }

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);
    let connect_options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database URL `{}`", db_url))?
        .create_if_missing(true);
    if let Some(parent) = connect_options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?,
    );

    // --- Schema (idempotent) ---
    metadata_store::run_migrations(&db).await?;
    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Wire the pipeline ---
    let documents = SqliteMetadataStore::new(db.clone());
    let pipeline = ExtractionPipeline::new(
        objects.clone(),
        Arc::new(documents.clone()),
        cfg.failure_policy,
    );
    let processor = Arc::new(FileProcessor::new(ReaderRegistry::with_defaults(), pipeline));

    if let RunMode::Ingest { path, format } = mode {
        return ingest_file(&processor, &path, format).await;
    }

    let state = AppState {
        processor,
        documents,
        objects,
        db,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_archive_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Extract one archive from disk and print the report as JSON.
async fn ingest_file(
    processor: &FileProcessor,
    path: &Path,
    format: Option<archive::ArchiveFormat>,
) -> Result<()> {
    let payload = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading archive {}", path.display()))?;
    let report = processor
        .process(Bytes::from(payload), format)
        .await
        .with_context(|| format!("processing archive {}", path.display()))?;

    if !report.is_complete() {
        tracing::warn!(
            failed = report.failed.len(),
            halted = report.halted,
            "Archive {} was only partially extracted",
            path.display()
        );
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
