//! Object storage for extracted files.
//!
//! `LocalObjectStore` keeps payloads on disk, sharded beneath
//! `base_path/{container}/{shard}/{shard}/{key}` with shards taken from
//! MD5(container/key). Writes go to a temp file first and are renamed into
//! place, so an existing object is replaced atomically.

use crate::services::naming::{self, NamingError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use md5::Context;
use serde::Serialize;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

/// Object payload, streamed in chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error(transparent)]
    InvalidKey(#[from] NamingError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Result of a successful `put`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size_bytes: u64,
    /// Hex MD5 of the stored bytes.
    pub etag: String,
}

/// Durable, key-addressed blob storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `content` under `key`, replacing any existing object.
    async fn put(&self, key: &str, content: ByteStream) -> ObjectStoreResult<StoredObject>;
}

#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    /// Base directory on disk where containers live.
    base_path: PathBuf,

    /// Destination container, one directory beneath `base_path`.
    container: String,
}

impl LocalObjectStore {
    /// Fails if `container` breaks the container naming rules.
    pub fn new(base_path: impl Into<PathBuf>, container: &str) -> Result<Self, NamingError> {
        naming::validate_container_name(container)?;
        Ok(Self {
            base_path: base_path.into(),
            container: container.to_string(),
        })
    }

    /// Physical root of the container. Not checked for existence.
    pub fn container_root(&self) -> PathBuf {
        self.base_path.join(&self.container)
    }

    /// Create the container directory if it is missing.
    pub async fn ensure_container(&self) -> io::Result<()> {
        fs::create_dir_all(self.container_root()).await
    }

    fn object_shards(&self, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", self.container, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path for `key`. Parent directories may not exist yet.
    pub fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = self.object_shards(key);
        let mut path = self.container_root();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    /// - Streams bytes into a temp file next to the destination.
    /// - Computes MD5 and size while streaming.
    /// - fsyncs, then renames over any existing object.
    ///
    /// The temp file is removed on every failure path, including when the
    /// future is dropped mid-write.
    async fn put(&self, key: &str, mut content: ByteStream) -> ObjectStoreResult<StoredObject> {
        naming::validate_object_key(key)?;

        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            io::Error::new(ErrorKind::Other, "object path missing parent directory")
        })?;
        fs::create_dir_all(&parent).await?;
        let mut tmp = TempPath::new(parent.join(format!(".tmp-{}", Uuid::new_v4())));
        let mut file = File::create(tmp.path()).await?;

        let mut size_bytes: u64 = 0;
        let mut digest = Context::new();
        let written: io::Result<()> = async {
            while let Some(chunk) = content.next().await {
                let chunk = chunk?;
                size_bytes += chunk.len() as u64;
                digest.consume(&chunk);
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        written?;

        if let Err(err) = fs::rename(tmp.path(), &file_path).await {
            if err.kind() != ErrorKind::AlreadyExists {
                return Err(err.into());
            }
            fs::remove_file(&file_path).await?;
            fs::rename(tmp.path(), &file_path).await?;
        }
        tmp.persisted();
        debug!(key, path = %file_path.display(), size_bytes, "stored object");

        Ok(StoredObject {
            key: key.to_string(),
            size_bytes,
            etag: format!("{:x}", digest.compute()),
        })
    }
}

/// Deletes the temp file on drop unless it was moved into place.
struct TempPath {
    path: PathBuf,
    persisted: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(&mut self) {
        self.persisted = true;
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
