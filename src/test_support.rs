//! Fakes and archive builders shared by unit tests.

use crate::{
    archive::{
        ArchiveEntries, ArchiveError, ArchiveReader, EntryContent, EntryDefect, EntryHeader,
        EntryVisitor,
    },
    models::document::DocumentRecord,
    services::{
        metadata_store::{self, MetadataError, MetadataRecorder, MetadataResult},
        object_store::{ByteStream, ObjectStore, ObjectStoreError, ObjectStoreResult, StoredObject},
    },
};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::{
    collections::{HashMap, HashSet},
    io::{self, Cursor, Write},
    sync::{Arc, Mutex},
};

/// In-memory archive reader over a fixed list of entries.
pub struct StaticReader {
    entries: Vec<(EntryHeader, Vec<u8>)>,
    fail_after: Option<usize>,
    defects: HashMap<usize, EntryDefect>,
}

impl StaticReader {
    pub fn new(entries: Vec<(EntryHeader, Vec<u8>)>) -> Self {
        Self {
            entries,
            fail_after: None,
            defects: HashMap::new(),
        }
    }

    /// Report a corrupt archive once `count` entries have been visited.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Hand the entry at `index` over as unreadable instead of with its content.
    pub fn defective_at(mut self, index: usize, defect: EntryDefect) -> Self {
        self.defects.insert(index, defect);
        self
    }
}

impl ArchiveReader for StaticReader {
    fn walk(self: Box<Self>, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        let Self {
            entries,
            fail_after,
            mut defects,
        } = *self;
        for (visited, (header, content)) in entries.into_iter().enumerate() {
            if fail_after == Some(visited) {
                return Err(ArchiveError::Corrupt("truncated archive".into()));
            }
            let flow = match defects.remove(&visited) {
                Some(defect) => visitor.visit_defective(header, defect)?,
                None => visitor.visit(header, &mut Cursor::new(content))?,
            };
            if flow.is_break() {
                return Ok(());
            }
        }
        Ok(())
    }
}

pub async fn read_all(mut content: EntryContent) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = content.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf)
}

/// Drain a sequence into (header, content) pairs.
pub async fn collect_entries(mut entries: ArchiveEntries) -> Vec<(EntryHeader, Vec<u8>)> {
    let mut out = Vec::new();
    while let Some(entry) = entries.next().await.unwrap() {
        let content = read_all(entry.open_content()).await.unwrap();
        out.push((entry.header().clone(), content));
    }
    out
}

/// Object store that keeps every put in memory, in call order.
#[derive(Default)]
pub struct RecordingObjectStore {
    puts: Mutex<Vec<(String, Vec<u8>)>>,
    fail_on: HashSet<String>,
}

impl RecordingObjectStore {
    pub fn failing_on<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            fail_on: keys.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.puts.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.puts().into_iter().map(|(key, _)| key).collect()
    }

    pub fn latest(&self, key: &str) -> Option<Vec<u8>> {
        self.puts()
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, content)| content)
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn put(&self, key: &str, mut content: ByteStream) -> ObjectStoreResult<StoredObject> {
        if self.fail_on.contains(key) {
            return Err(ObjectStoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "quota exceeded",
            )));
        }
        let mut buf = Vec::new();
        while let Some(chunk) = content.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let stored = StoredObject {
            key: key.to_string(),
            size_bytes: buf.len() as u64,
            etag: format!("{:x}", md5::compute(&buf)),
        };
        self.puts.lock().unwrap().push((key.to_string(), buf));
        Ok(stored)
    }
}

/// Metadata recorder that keeps every record in memory, in call order.
#[derive(Default)]
pub struct RecordingRecorder {
    records: Mutex<Vec<DocumentRecord>>,
    fail_on: HashSet<String>,
}

impl RecordingRecorder {
    pub fn failing_on<'a>(business_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            fail_on: business_ids.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<DocumentRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn business_ids(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.business_id).collect()
    }
}

#[async_trait]
impl MetadataRecorder for RecordingRecorder {
    async fn create(&self, record: &DocumentRecord) -> MetadataResult<()> {
        if self.fail_on.contains(&record.business_id) {
            return Err(MetadataError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Single-connection in-memory SQLite with the schema applied.
pub async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    metadata_store::run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}

/// A member of an archive built in a test.
pub enum ArchiveItem {
    File(&'static str, Vec<u8>),
    Dir(&'static str),
    /// AES-encrypted in zips. Tars have no encryption and store it as a plain file.
    Encrypted(&'static str, Vec<u8>),
}

impl ArchiveItem {
    pub fn file(name: &'static str, content: &[u8]) -> Self {
        Self::File(name, content.to_vec())
    }

    pub fn encrypted(name: &'static str, content: &[u8]) -> Self {
        Self::Encrypted(name, content.to_vec())
    }

    pub fn dir(name: &'static str) -> Self {
        Self::Dir(name)
    }
}

pub fn zip_bytes(items: &[ArchiveItem]) -> Vec<u8> {
    use zip::write::{SimpleFileOptions, ZipWriter};

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for item in items {
        match item {
            ArchiveItem::File(name, content) => {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content).unwrap();
            }
            ArchiveItem::Dir(name) => writer.add_directory(*name, options).unwrap(),
            ArchiveItem::Encrypted(name, content) => {
                let encrypted = options.with_aes_encryption(zip::AesMode::Aes256, "secret");
                writer.start_file(*name, encrypted).unwrap();
                writer.write_all(content).unwrap();
            }
        }
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_bytes(items: &[ArchiveItem]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for item in items {
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        match item {
            ArchiveItem::File(name, content) | ArchiveItem::Encrypted(name, content) => {
                header.set_size(content.len() as u64);
                builder.append_data(&mut header, name, content.as_slice()).unwrap();
            }
            ArchiveItem::Dir(name) => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_mode(0o755);
                header.set_size(0);
                builder.append_data(&mut header, name, io::empty()).unwrap();
            }
        }
    }
    builder.into_inner().unwrap()
}

/// Single-member ustar archive whose name field holds `name` byte for byte.
pub fn tar_with_raw_name(name: &[u8], content: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_ustar();
    header.as_old_mut().name[..name.len()].copy_from_slice(name);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mode(0o644);
    header.set_size(content.len() as u64);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append(&header, content).unwrap();
    builder.into_inner().unwrap()
}

pub fn tar_gz_bytes(items: &[ArchiveItem]) -> Vec<u8> {
    use flate2::{Compression, write::GzEncoder};

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(items)).unwrap();
    encoder.finish().unwrap()
}
