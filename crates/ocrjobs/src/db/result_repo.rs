//! Result repository: rows of the `ocr_results` table.
//!
//! Results are only ever written by [`super::job_repo::complete_with_result`]
//! and removed by the cascade on job deletion, so this module is read-only.

use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, Database, DatabaseError};
use crate::job::OcrResult;

const RESULT_COLUMNS: &str = "id, job_id, document_id, raw_text, markdown_text, structured_data,
     confidence, processing_time_ms, num_pages, created_at";

struct ResultRow {
    id: String,
    job_id: String,
    document_id: String,
    raw_text: String,
    markdown_text: String,
    structured_data: Option<String>,
    confidence: f64,
    processing_time_ms: i64,
    num_pages: u32,
    created_at: String,
}

impl ResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            document_id: row.get("document_id")?,
            raw_text: row.get("raw_text")?,
            markdown_text: row.get("markdown_text")?,
            structured_data: row.get("structured_data")?,
            confidence: row.get("confidence")?,
            processing_time_ms: row.get("processing_time_ms")?,
            num_pages: row.get("num_pages")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_result(self) -> Result<OcrResult, DatabaseError> {
        let structured_data = match self.structured_data {
            Some(raw) => Some(serde_json::from_str(&raw).map_err(|_| DatabaseError::Corrupt {
                column: "structured_data",
                value: raw.clone(),
            })?),
            None => None,
        };

        Ok(OcrResult {
            id: parse_uuid("id", &self.id)?,
            job_id: parse_uuid("job_id", &self.job_id)?,
            document_id: parse_uuid("document_id", &self.document_id)?,
            raw_text: self.raw_text,
            markdown_text: self.markdown_text,
            structured_data,
            confidence: self.confidence,
            processing_time_ms: u64::try_from(self.processing_time_ms).unwrap_or_default(),
            num_pages: self.num_pages,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

/// Finds the result of a job, if it completed.
pub fn find_by_job_id(db: &Database, job_id: Uuid) -> Result<Option<OcrResult>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM ocr_results WHERE job_id = ?1", RESULT_COLUMNS),
                params![job_id.to_string()],
                ResultRow::from_row,
            )
            .optional()?;
        Ok(row)
    })?;
    row.map(ResultRow::into_result).transpose()
}
