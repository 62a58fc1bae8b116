//! Records persisted by the service.
//!
//! These map to database tables via `sqlx::FromRow` and serialize as JSON
//! via `serde` with the document-store field names.

pub mod document;
