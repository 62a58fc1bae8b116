//! Archive readers.
//!
//! Each supported container format implements [`ArchiveReader`], a synchronous
//! walk over the archive that hands every entry's header and content to an
//! [`EntryVisitor`]. [`ArchiveEntries`] drives such a walk on a blocking worker
//! and exposes it to async code as a lazy, one-pass sequence of entries.

pub mod entries;
mod tarfile;
mod zipfile;

pub use entries::{ArchiveEntries, ArchiveEntry, EntryContent};
pub use tarfile::{open_tar, open_tar_gz};
pub use zipfile::open_zip;

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::{fmt, io, io::Read, ops::ControlFlow, str::FromStr};
use thiserror::Error;

// Tar needs ~262 bytes to expose its `ustar` magic.
const SNIFF_LEN: usize = 512;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("archive reader stopped unexpectedly")]
    ReaderGone,
}

/// Container formats the service knows how to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

impl ArchiveFormat {
    /// Sniff the format from the leading bytes of a payload.
    pub fn detect(payload: &[u8]) -> Option<Self> {
        let head = &payload[..payload.len().min(SNIFF_LEN)];
        if infer::archive::is_zip(head) {
            return Some(Self::Zip);
        }
        if infer::archive::is_tar(head) {
            return Some(Self::Tar);
        }
        if infer::archive::is_gz(head) {
            // A bare gzip stream is not an archive; only accept it when it wraps a tar.
            let mut inflated = Vec::with_capacity(SNIFF_LEN);
            let decoder = GzDecoder::new(payload);
            if decoder
                .take(SNIFF_LEN as u64)
                .read_to_end(&mut inflated)
                .is_ok()
                && infer::archive::is_tar(&inflated)
            {
                return Some(Self::TarGz);
            }
        }
        None
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Zip => "zip",
            Self::Tar => "tar",
            Self::TarGz => "tar.gz",
        };
        f.write_str(name)
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar" => Ok(Self::Tar),
            "tar.gz" | "tgz" | "tar-gz" => Ok(Self::TarGz),
            other => Err(format!("unsupported archive format `{}`", other)),
        }
    }
}

/// Why a member that was found cannot be handed over as content.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntryDefect {
    #[error("member name is not valid UTF-8")]
    NameNotUtf8,
    #[error("member cannot be read: {0}")]
    Unreadable(String),
}

/// Read-only view of one archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Path of the member inside the archive, exactly as stored. For a member
    /// with [`EntryDefect::NameNotUtf8`] it is a lossy rendering, only fit for logs.
    pub key: String,
    /// Declared uncompressed size. Not verified against the content.
    pub size: u64,
    pub is_directory: bool,
}

impl EntryHeader {
    pub fn file(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            is_directory: false,
        }
    }

    pub fn directory(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            size: 0,
            is_directory: true,
        }
    }
}

/// Receives archive members in storage order.
pub trait EntryVisitor {
    /// `content` is only valid for the duration of this call.
    fn visit(
        &mut self,
        header: EntryHeader,
        content: &mut dyn Read,
    ) -> Result<ControlFlow<()>, ArchiveError>;

    /// A member that is listed in the archive but cannot be read. The walk
    /// carries on with the next member unless this returns `Break`.
    fn visit_defective(
        &mut self,
        header: EntryHeader,
        defect: EntryDefect,
    ) -> Result<ControlFlow<()>, ArchiveError>;
}

/// A format-specific, single-pass archive walker.
pub trait ArchiveReader: Send {
    fn walk(self: Box<Self>, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError>;
}
