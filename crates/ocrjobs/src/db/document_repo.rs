//! Document repository: rows of the `documents` table.
//!
//! Uploading and storing files is handled elsewhere; the scheduler only needs
//! to know who owns a document and where its bytes live.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{format_timestamp, parse_optional_timestamp, parse_timestamp, parse_uuid};
use super::{Database, DatabaseError};
use crate::documents::Document;

struct DocumentRow {
    id: String,
    user_id: String,
    file_path: String,
    original_filename: String,
    mime_type: Option<String>,
    created_at: String,
    deleted_at: Option<String>,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            file_path: row.get("file_path")?,
            original_filename: row.get("original_filename")?,
            mime_type: row.get("mime_type")?,
            created_at: row.get("created_at")?,
            deleted_at: row.get("deleted_at")?,
        })
    }

    fn into_document(self) -> Result<Document, DatabaseError> {
        Ok(Document {
            id: parse_uuid("id", &self.id)?,
            user_id: parse_uuid("user_id", &self.user_id)?,
            file_path: self.file_path.into(),
            original_filename: self.original_filename,
            mime_type: self.mime_type,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            deleted_at: parse_optional_timestamp("deleted_at", self.deleted_at)?,
        })
    }
}

pub fn insert(db: &Database, doc: &Document) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, user_id, file_path, original_filename, mime_type,
             created_at, deleted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                doc.id.to_string(),
                doc.user_id.to_string(),
                doc.file_path.to_string_lossy(),
                doc.original_filename,
                doc.mime_type,
                format_timestamp(&doc.created_at),
                doc.deleted_at.as_ref().map(format_timestamp),
            ],
        )?;
        Ok(())
    })
}

/// Finds a live document. Soft-deleted documents are reported as missing.
pub fn find_by_id(db: &Database, id: Uuid) -> Result<Option<Document>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT id, user_id, file_path, original_filename, mime_type, created_at, deleted_at
                 FROM documents WHERE id = ?1 AND deleted_at IS NULL",
                params![id.to_string()],
                DocumentRow::from_row,
            )
            .optional()?;
        Ok(row)
    })?;
    row.map(DocumentRow::into_document).transpose()
}

/// Marks a document deleted. Returns false if it was missing or already deleted.
pub fn soft_delete(db: &Database, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE documents SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
            params![id.to_string(), format_timestamp(&now)],
        )?;
        Ok(changed == 1)
    })
}
