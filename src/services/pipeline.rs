//! Extraction pipeline: walk an archive and, for every file entry, validate
//! its key, upload its bytes and record its metadata.
//!
//! Entries are handled strictly one after another. The upload and metadata
//! write for one entry finish (or fail) before the next entry is requested,
//! because an entry's content is only readable while it is current.
//!
//! The object write and the metadata write are two independent calls. If the
//! second one fails the object stays in place; nothing is rolled back.

use crate::{
    archive::{ArchiveEntries, ArchiveEntry, ArchiveError, EntryDefect},
    models::document::DocumentRecord,
    services::{
        metadata_store::{MetadataError, MetadataRecorder},
        naming::{self, NamingError},
        object_store::{ObjectStore, ObjectStoreError},
    },
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What to do with the rest of an archive once one entry fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failure and carry on with the next entry.
    #[default]
    Isolate,
    /// Stop at the first failure. The caller still sees normal completion;
    /// the failure only shows up in the logs.
    Abort,
}

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("naming violation: {0}")]
    Naming(#[from] NamingError),
    #[error(transparent)]
    Defect(#[from] EntryDefect),
    #[error("declared size {0} does not fit a metadata record")]
    SizeOutOfRange(u64),
    #[error("upload failed: {0}")]
    Upload(#[from] ObjectStoreError),
    #[error("metadata write failed: {0}")]
    Metadata(#[from] MetadataError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Naming,
    Upload,
    Metadata,
    Reader,
}

impl EntryError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Naming(_) | Self::Defect(EntryDefect::NameNotUtf8) => FailureKind::Naming,
            Self::Defect(EntryDefect::Unreadable(_)) => FailureKind::Reader,
            Self::SizeOutOfRange(_) => FailureKind::Metadata,
            Self::Upload(_) => FailureKind::Upload,
            Self::Metadata(_) => FailureKind::Metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessedEntry {
    pub key: String,
    pub record_id: Uuid,
    pub size_bytes: u64,
    pub etag: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EntryFailure {
    /// Missing when the reader failed before producing an entry. A name that is
    /// not valid UTF-8 appears here in lossy form.
    pub key: Option<String>,
    pub kind: FailureKind,
    pub message: String,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionReport {
    pub succeeded: Vec<ProcessedEntry>,
    pub failed: Vec<EntryFailure>,
    pub directories_skipped: usize,
    /// Entries after the last one reported may not have been looked at.
    pub halted: bool,
}

impl ExtractionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && !self.halted
    }
}

pub struct ExtractionPipeline {
    objects: Arc<dyn ObjectStore>,
    recorder: Arc<dyn MetadataRecorder>,
    policy: FailurePolicy,
}

impl ExtractionPipeline {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        recorder: Arc<dyn MetadataRecorder>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            objects,
            recorder,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Drive `entries` to the end (or to the first failure under
    /// [`FailurePolicy::Abort`]).
    #[tracing::instrument(skip_all, fields(policy = ?self.policy))]
    pub async fn run(&self, entries: &mut ArchiveEntries) -> ExtractionReport {
        let mut report = ExtractionReport::default();
        info!("Start extracting archive entries");

        loop {
            let entry = match entries.next().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    error!(kind = ?FailureKind::Reader, error = %err, "archive could not be read further");
                    report.failed.push(reader_failure(&err));
                    report.halted = true;
                    break;
                }
            };

            if entry.is_directory() {
                debug!(key = entry.key(), "skipping directory entry");
                report.directories_skipped += 1;
                continue;
            }

            info!(key = entry.key(), size = entry.size(), "Now processing entry");
            match self.process_entry(&entry).await {
                Ok(processed) => {
                    info!(key = entry.key(), "processed successfully and moved to destination container");
                    report.succeeded.push(processed);
                }
                Err(err) => {
                    error!(key = entry.key(), kind = ?err.kind(), error = %err, "failed to process archive entry");
                    report.failed.push(EntryFailure {
                        key: Some(entry.key().to_string()),
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                    if self.policy == FailurePolicy::Abort {
                        warn!(key = entry.key(), "abandoning remaining archive entries");
                        report.halted = true;
                        break;
                    }
                }
            }
        }

        info!(
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            directories_skipped = report.directories_skipped,
            halted = report.halted,
            "Finished extracting archive entries"
        );
        report
    }

    /// Validate, upload, record. The content stream is consumed by the upload
    /// and dropped with it, whether the upload succeeds or not.
    async fn process_entry(&self, entry: &ArchiveEntry) -> Result<ProcessedEntry, EntryError> {
        if let Some(defect) = entry.defect() {
            return Err(defect.clone().into());
        }
        let key = naming::validate_object_key(entry.key())?;
        let size = i64::try_from(entry.size()).map_err(|_| EntryError::SizeOutOfRange(entry.size()))?;

        let stored = self.objects.put(key, entry.open_content()).await?;

        let record = DocumentRecord::for_entry(key, size, Utc::now());
        self.recorder.create(&record).await?;

        Ok(ProcessedEntry {
            key: key.to_string(),
            record_id: record.record_id,
            size_bytes: stored.size_bytes,
            etag: stored.etag,
        })
    }
}

fn reader_failure(err: &ArchiveError) -> EntryFailure {
    EntryFailure {
        key: None,
        kind: FailureKind::Reader,
        message: err.to_string(),
    }
}
