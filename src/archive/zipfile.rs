use super::{ArchiveError, ArchiveReader, EntryDefect, EntryHeader, EntryVisitor};
use bytes::Bytes;
use std::io::Cursor;
use tracing::warn;

/// Walks a zip archive in central-directory order.
pub struct ZipReader {
    archive: zip::ZipArchive<Cursor<Bytes>>,
}

impl ArchiveReader for ZipReader {
    fn walk(self: Box<Self>, visitor: &mut dyn EntryVisitor) -> Result<(), ArchiveError> {
        let Self { mut archive } = *self;
        for index in 0..archive.len() {
            // The central directory locates every member, so one that cannot
            // be opened does not stop the walk.
            let err = match archive.by_index(index) {
                Ok(mut file) => {
                    let header = if file.is_dir() {
                        EntryHeader::directory(file.name())
                    } else {
                        EntryHeader::file(file.name(), file.size())
                    };
                    if visitor.visit(header, &mut file)?.is_break() {
                        break;
                    }
                    continue;
                }
                Err(err) => err,
            };
            let key = archive.name_for_index(index).unwrap_or_default().to_string();
            warn!(key = %key, error = %err, "zip member cannot be opened");
            let defect = EntryDefect::Unreadable(err.to_string());
            if visitor.visit_defective(EntryHeader::file(key, 0), defect)?.is_break() {
                break;
            }
        }
        Ok(())
    }
}

/// Parses the central directory up front so corrupt payloads fail before any entry is processed.
pub fn open_zip(payload: Bytes) -> Result<Box<dyn ArchiveReader>, ArchiveError> {
    let archive = zip::ZipArchive::new(Cursor::new(payload))?;
    Ok(Box::new(ZipReader { archive }))
}
