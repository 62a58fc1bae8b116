use super::{ArchiveError, ArchiveReader, EntryDefect, EntryHeader, EntryVisitor};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::debug;

const BLOCK_SIZE: usize = 512;
// Offsets of the checksum field within a header block.
const CKSUM_START: usize = 148;
const CKSUM_END: usize = 156;

pub struct TarReader<R: Read + Send> {
    archive: tar::Archive<R>,
}

impl<R: Read + Send> TarReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            archive: tar::Archive::new(reader),
        }
    }
}

impl<R: Read + Send> ArchiveReader for TarReader<R> {
    fn walk(self: Box<Self>, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        let Self { mut archive } = *self;
        for entry in archive.entries()? {
            let mut entry = entry?;
            let entry_type = entry.header().entry_type();
            let (key, defect) = match String::from_utf8(entry.path_bytes().into_owned()) {
                Ok(key) => (key, None),
                Err(err) => (
                    String::from_utf8_lossy(err.as_bytes()).into_owned(),
                    Some(EntryDefect::NameNotUtf8),
                ),
            };
            let header = if entry_type.is_dir() {
                EntryHeader::directory(key)
            } else if entry_type.is_file() || entry_type.is_contiguous() {
                EntryHeader::file(key, entry.size())
            } else {
                debug!(key = %key, ?entry_type, "skipping non-file tar member");
                continue;
            };
            let flow = match defect {
                Some(defect) => visitor.visit_defective(header, defect)?,
                None => visitor.visit(header, &mut entry)?,
            };
            if flow.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Checks the first header block so garbage fails here rather than mid-walk.
pub fn open_tar(payload: Bytes) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    check_first_block(&payload[..])?;
    Ok(Box::new(TarReader::new(Cursor::new(payload))))
}

pub fn open_tar_gz(payload: Bytes) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    if !infer::archive::is_gz(&payload) {
        return Err(ArchiveError::Corrupt("missing gzip header".into()));
    }
    check_first_block(GzDecoder::new(&payload[..]))?;
    Ok(Box::new(TarReader::new(GzDecoder::new(Cursor::new(
        payload,
    )))))
}

/// The first block must be an end-of-archive marker (all zeros) or a header
/// whose stored checksum matches its bytes.
fn check_first_block(source: impl Read) -> Result<(), ArchiveError> {
    let mut block = Vec::with_capacity(BLOCK_SIZE);
    source
        .take(BLOCK_SIZE as u64)
        .read_to_end(&mut block)
        .map_err(|err| ArchiveError::Corrupt(format!("unreadable tar stream: {}", err)))?;
    if block.len() < BLOCK_SIZE {
        return Err(ArchiveError::Corrupt("truncated tar header block".into()));
    }
    if block.iter().all(|b| *b == 0) {
        return Ok(());
    }

    let stored = tar::Header::from_byte_slice(&block)
        .cksum()
        .map_err(|err| ArchiveError::Corrupt(format!("invalid tar header: {}", err)))?;
    let computed: u32 = block[..CKSUM_START]
        .iter()
        .chain(&[b' '; CKSUM_END - CKSUM_START])
        .chain(&block[CKSUM_END..])
        .map(|b| u32::from(*b))
        .sum();
    if stored != computed {
        return Err(ArchiveError::Corrupt("tar header checksum mismatch".into()));
    }
    Ok(())
}
