//! Format dispatch: pick the reader for a payload and hand its entries to the
//! extraction pipeline.

use crate::{
    archive::{self, ArchiveEntries, ArchiveError, ArchiveFormat, ArchiveReader},
    services::pipeline::{ExtractionPipeline, ExtractionReport, FailurePolicy},
};
use bytes::Bytes;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

/// Builds a reader over a complete archive payload.
pub type ReaderFactory = fn(Bytes) -> Result<Box<dyn ArchiveReader>, ArchiveError>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("archive payload is empty")]
    EmptyPayload,
    #[error("could not determine the archive format")]
    UnknownFormat,
    #[error("archive format `{0}` is not supported")]
    Unsupported(ArchiveFormat),
    #[error("archive could not be opened: {0}")]
    Open(#[from] ArchiveError),
}

/// Formats this processor can open, fixed at construction.
#[derive(Clone, Default)]
pub struct ReaderRegistry {
    factories: HashMap<ArchiveFormat, ReaderFactory>,
}

impl ReaderRegistry {
    /// zip, tar and tar.gz.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry
            .register(ArchiveFormat::Zip, archive::open_zip)
            .register(ArchiveFormat::Tar, archive::open_tar)
            .register(ArchiveFormat::TarGz, archive::open_tar_gz);
        registry
    }

    pub fn register(&mut self, format: ArchiveFormat, factory: ReaderFactory) -> &mut Self {
        self.factories.insert(format, factory);
        self
    }

    #[cfg(test)]
    pub fn supports(&self, format: ArchiveFormat) -> bool {
        self.factories.contains_key(&format)
    }

    fn open(&self, format: ArchiveFormat, payload: Bytes) -> Result<Box<dyn ArchiveReader>, ProcessError> {
        let factory = self
            .factories
            .get(&format)
            .ok_or(ProcessError::Unsupported(format))?;
        Ok(factory(payload)?)
    }
}

pub struct FileProcessor {
    registry: ReaderRegistry,
    pipeline: ExtractionPipeline,
}

impl FileProcessor {
    pub fn new(registry: ReaderRegistry, pipeline: ExtractionPipeline) -> Self {
        Self { registry, pipeline }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.pipeline.policy()
    }

    /// Open `payload` as `declared` (or whatever it sniffs as) and extract it.
    ///
    /// Only failures to open the archive are returned as errors. Per-entry
    /// failures end up in the report.
    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn process(
        &self,
        payload: Bytes,
        declared: Option<ArchiveFormat>,
    ) -> Result<ExtractionReport, ProcessError> {
        if payload.is_empty() {
            return Err(ProcessError::EmptyPayload);
        }
        let format = match declared {
            Some(format) => format,
            None => ArchiveFormat::detect(&payload).ok_or(ProcessError::UnknownFormat)?,
        };
        info!(%format, "Opening archive");

        let reader = self.registry.open(format, payload)?;
        let mut entries = ArchiveEntries::spawn(reader);
        Ok(self.pipeline.run(&mut entries).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{
            metadata_store::SqliteMetadataStore,
            object_store::LocalObjectStore,
            pipeline::FailureKind,
        },
        test_support::{
            ArchiveItem, RecordingObjectStore, RecordingRecorder, memory_pool, tar_bytes,
            tar_gz_bytes, tar_with_raw_name, zip_bytes,
        },
    };
    use std::sync::Arc;
    use tempfile::tempdir;

    fn recording_processor(registry: ReaderRegistry) -> (FileProcessor, Arc<RecordingObjectStore>) {
        let objects = Arc::new(RecordingObjectStore::default());
        let pipeline = ExtractionPipeline::new(
            objects.clone(),
            Arc::new(RecordingRecorder::default()),
            FailurePolicy::Isolate,
        );
        (FileProcessor::new(registry, pipeline), objects)
    }

    fn sample() -> Vec<ArchiveItem> {
        vec![
            ArchiveItem::dir("folder/"),
            ArchiveItem::file("folder/a.txt", b"alpha"),
            ArchiveItem::file("readme.txt", b"hello world!"),
        ]
    }

    #[tokio::test]
    async fn routes_each_format_to_its_reader() {
        for payload in [zip_bytes(&sample()), tar_bytes(&sample()), tar_gz_bytes(&sample())] {
            let (processor, objects) = recording_processor(ReaderRegistry::with_defaults());

            let report = processor.process(Bytes::from(payload), None).await.unwrap();

            assert!(report.is_complete());
            assert_eq!(objects.keys(), vec!["folder/a.txt", "readme.txt"]);
        }
    }

    #[tokio::test]
    async fn declared_format_overrides_sniffing() {
        let (processor, _) = recording_processor(ReaderRegistry::with_defaults());
        let result = processor
            .process(Bytes::from(tar_bytes(&sample())), Some(ArchiveFormat::Zip))
            .await;
        assert!(matches!(result, Err(ProcessError::Open(ArchiveError::Zip(_)))));
    }

    #[tokio::test]
    async fn corrupt_declared_tar_fails_the_call() {
        let (processor, objects) = recording_processor(ReaderRegistry::with_defaults());

        let result = processor
            .process(Bytes::from(vec![0x41u8; 1024]), Some(ArchiveFormat::Tar))
            .await;
        assert!(matches!(result, Err(ProcessError::Open(ArchiveError::Corrupt(_)))));

        let zipped_text = zip_bytes(&[ArchiveItem::file("a.txt", b"a")]);
        let result = processor
            .process(Bytes::from(zipped_text), Some(ArchiveFormat::TarGz))
            .await;
        assert!(matches!(result, Err(ProcessError::Open(ArchiveError::Corrupt(_)))));
        assert!(objects.puts().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_and_unrecognised_payloads() {
        let (processor, _) = recording_processor(ReaderRegistry::with_defaults());

        assert!(matches!(
            processor.process(Bytes::new(), None).await,
            Err(ProcessError::EmptyPayload)
        ));
        assert!(matches!(
            processor.process(Bytes::from_static(b"not an archive"), None).await,
            Err(ProcessError::UnknownFormat)
        ));
    }

    #[tokio::test]
    async fn unregistered_format_is_unsupported() {
        let mut registry = ReaderRegistry::default();
        registry.register(ArchiveFormat::Tar, archive::open_tar);
        assert!(!registry.supports(ArchiveFormat::Zip));
        let (processor, _) = recording_processor(registry);

        let result = processor.process(Bytes::from(zip_bytes(&sample())), None).await;
        assert!(matches!(result, Err(ProcessError::Unsupported(ArchiveFormat::Zip))));
    }

    #[tokio::test]
    async fn end_to_end_with_disk_and_sqlite() {
        let dir = tempdir().unwrap();
        let objects = Arc::new(LocalObjectStore::new(dir.path(), "extracted").unwrap());
        let documents = SqliteMetadataStore::new(memory_pool().await);
        let pipeline = ExtractionPipeline::new(
            objects.clone(),
            Arc::new(documents.clone()),
            FailurePolicy::Isolate,
        );
        let processor = FileProcessor::new(ReaderRegistry::with_defaults(), pipeline);

        let first = zip_bytes(&[ArchiveItem::file("readme.txt", b"hello world!")]);
        let second = zip_bytes(&[ArchiveItem::file("readme.txt", b"goodbye")]);
        processor.process(Bytes::from(first), None).await.unwrap();
        let report = processor.process(Bytes::from(second), None).await.unwrap();

        assert_eq!(report.succeeded[0].size_bytes, 7);
        assert_eq!(std::fs::read(objects.object_path("readme.txt")).unwrap(), b"goodbye");
        let records = documents.find_by_business_id("readme.txt").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].record_id, records[1].record_id);
        assert_eq!(records[0].size_bytes, 12);
        assert_eq!(records[1].size_bytes, 7);
    }

    #[tokio::test]
    async fn invalid_member_names_are_reported_per_entry() {
        let (processor, objects) = recording_processor(ReaderRegistry::with_defaults());
        let payload = zip_bytes(&[
            ArchiveItem::file("../escape.txt", b"nope"),
            ArchiveItem::file("ok.txt", b"ok"),
        ]);

        let report = processor.process(Bytes::from(payload), None).await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, FailureKind::Naming);
        assert_eq!(objects.keys(), vec!["ok.txt"]);
    }

    #[tokio::test]
    async fn undecodable_and_unreadable_members_are_reported_per_entry() {
        let (processor, objects) = recording_processor(ReaderRegistry::with_defaults());

        let report = processor
            .process(Bytes::from(tar_with_raw_name(b"caf\xe9.txt", b"latte")), None)
            .await
            .unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].kind, FailureKind::Naming);
        assert!(objects.puts().is_empty());

        let payload = zip_bytes(&[
            ArchiveItem::encrypted("secret.txt", b"classified"),
            ArchiveItem::file("ok.txt", b"ok"),
        ]);
        let report = processor.process(Bytes::from(payload), None).await.unwrap();
        assert!(!report.halted);
        assert_eq!(report.failed[0].key.as_deref(), Some("secret.txt"));
        assert_eq!(report.failed[0].kind, FailureKind::Reader);
        assert_eq!(objects.keys(), vec!["ok.txt"]);
    }
}
