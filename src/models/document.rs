//! Metadata describing one extracted archive member.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fixed description tagging records created by archive uploads.
pub const UPLOAD_DESCRIPTION: &str = "Upload";

/// One metadata entry per extracted file.
///
/// `business_id` is the archive-relative path. It doubles as the object key
/// and as the partition key of the metadata store, so it is not unique:
/// re-uploading the same path produces a second record with a fresh `record_id`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct DocumentRecord {
    /// Freshly generated for every record, never derived from content.
    #[serde(rename = "id")]
    pub record_id: Uuid,

    #[serde(rename = "documentId")]
    pub business_id: String,

    /// Label built from the processing time. Not unique.
    #[serde(rename = "name")]
    pub display_name: String,

    pub description: String,

    /// Declared size from the archive header.
    #[serde(rename = "size")]
    pub size_bytes: i64,

    /// Always true: a record is only written after its object was stored.
    #[serde(rename = "isComplete")]
    pub completed: bool,

    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// `size` is the declared size, already checked to fit the record.
    pub fn for_entry(key: &str, size: i64, processed_at: DateTime<Utc>) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            business_id: key.to_string(),
            display_name: format!("file{}", processed_at.format("%H:%M:%S")),
            description: UPLOAD_DESCRIPTION.to_string(),
            size_bytes: size,
            completed: true,
            created_at: processed_at,
        }
    }
}
