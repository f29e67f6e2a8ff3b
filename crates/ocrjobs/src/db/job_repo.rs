//! Job repository: rows of the `ocr_jobs` table.
//!
//! Every status change is a single conditional `UPDATE` keyed on the
//! expected current status. The affected-row count tells the caller whether
//! its transition landed; a `false` return means another writer got there
//! first and nothing was changed.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_uuid, Database,
    DatabaseError,
};
use crate::job::{Job, JobStatus, Metadata, OcrResult, PageRequest};

const JOB_COLUMNS: &str = "id, document_id, user_id, status, ocr_mode, resolution_mode, priority,
     retry_count, max_retries, progress, created_at, started_at, completed_at, error_message,
     next_attempt_at, metadata";

const QUEUE_ORDER: &str = "ORDER BY priority DESC, created_at ASC, rowid ASC";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    document_id: String,
    user_id: String,
    status: String,
    ocr_mode: String,
    resolution_mode: String,
    priority: i32,
    retry_count: u32,
    max_retries: u32,
    progress: u8,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    next_attempt_at: Option<String>,
    metadata: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            user_id: row.get("user_id")?,
            status: row.get("status")?,
            ocr_mode: row.get("ocr_mode")?,
            resolution_mode: row.get("resolution_mode")?,
            priority: row.get("priority")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
            progress: row.get("progress")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            error_message: row.get("error_message")?,
            next_attempt_at: row.get("next_attempt_at")?,
            metadata: row.get("metadata")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |column: &'static str, value: &str| DatabaseError::Corrupt {
            column,
            value: value.to_string(),
        };

        let metadata: Metadata =
            serde_json::from_str(&self.metadata).map_err(|_| corrupt("metadata", &self.metadata))?;

        Ok(Job {
            id: parse_uuid("id", &self.id)?,
            document_id: parse_uuid("document_id", &self.document_id)?,
            user_id: parse_uuid("user_id", &self.user_id)?,
            status: self
                .status
                .parse()
                .map_err(|_| corrupt("status", &self.status))?,
            ocr_mode: self
                .ocr_mode
                .parse()
                .map_err(|_| corrupt("ocr_mode", &self.ocr_mode))?,
            resolution_mode: self
                .resolution_mode
                .parse()
                .map_err(|_| corrupt("resolution_mode", &self.resolution_mode))?,
            priority: self.priority,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            progress: self.progress,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            started_at: parse_optional_timestamp("started_at", self.started_at)?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at)?,
            error_message: self.error_message,
            next_attempt_at: parse_optional_timestamp("next_attempt_at", self.next_attempt_at)?,
            metadata,
        })
    }
}

fn collect_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>, DatabaseError> {
    rows.into_iter().map(JobRow::into_job).collect()
}

/// Outcome of the atomic "store result and mark completed" step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The result was stored and the job is now completed.
    Completed,
    /// The job had left `processing` (usually cancelled); nothing was written.
    Superseded,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    let metadata = serde_json::to_string(&job.metadata).map_err(|e| DatabaseError::Corrupt {
        column: "metadata",
        value: e.to_string(),
    })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO ocr_jobs (id, document_id, user_id, status, ocr_mode, resolution_mode,
             priority, retry_count, max_retries, progress, created_at, started_at, completed_at,
             error_message, next_attempt_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id.to_string(),
                job.document_id.to_string(),
                job.user_id.to_string(),
                job.status.as_str(),
                job.ocr_mode.as_str(),
                job.resolution_mode.as_str(),
                job.priority,
                job.retry_count,
                job.max_retries,
                job.progress,
                format_timestamp(&job.created_at),
                job.started_at.as_ref().map(format_timestamp),
                job.completed_at.as_ref().map(format_timestamp),
                job.error_message,
                job.next_attempt_at.as_ref().map(format_timestamp),
                metadata,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: Uuid) -> Result<Option<Job>, DatabaseError> {
    let row = db.with_conn(|conn| {
        let row = conn
            .query_row(
                &format!("SELECT {} FROM ocr_jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.to_string()],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })?;
    row.map(JobRow::into_job).transpose()
}

/// Lists a user's jobs newest first, returning (page, total_count).
pub fn list_by_user(
    db: &Database,
    user_id: Uuid,
    status: Option<JobStatus>,
    page: PageRequest,
) -> Result<(Vec<Job>, u64), DatabaseError> {
    let (rows, total) = db.with_conn(|conn| {
        let mut conditions = vec!["user_id = ?1".to_string()];
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
            vec![Box::new(user_id.to_string())];

        if let Some(status) = status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.as_str()));
        }

        let where_clause = format!("WHERE {}", conditions.join(" AND "));

        let count_sql = format!("SELECT COUNT(*) FROM ocr_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        param_values.push(Box::new(page.per_page as i64));
        param_values.push(Box::new(page.offset() as i64));
        let query_sql = format!(
            "SELECT {} FROM ocr_jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            JOB_COLUMNS,
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })?;

    Ok((collect_jobs(rows)?, total))
}

/// Pending jobs in dispatch order: highest priority first, FIFO within a priority.
pub fn list_pending(db: &Database, limit: u32) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ocr_jobs WHERE status = 'pending' {} LIMIT ?1",
            JOB_COLUMNS, QUEUE_ORDER
        ))?;
        let rows = stmt
            .query_map(params![limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    collect_jobs(rows)
}

/// Like [`list_pending`] but skips jobs still waiting out a retry backoff.
pub fn list_due(
    db: &Database,
    now: DateTime<Utc>,
    limit: u32,
) -> Result<Vec<Job>, DatabaseError> {
    let rows = db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM ocr_jobs
             WHERE status = 'pending' AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
             {} LIMIT ?2",
            JOB_COLUMNS, QUEUE_ORDER
        ))?;
        let rows = stmt
            .query_map(params![format_timestamp(&now), limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })?;
    collect_jobs(rows)
}

/// pending → processing for a job that is due at `now`. Sets `started_at`
/// only on the first claim.
///
/// A job still inside its retry backoff is not claimed.
pub fn claim(db: &Database, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs
             SET status = 'processing', started_at = COALESCE(started_at, ?2),
                 next_attempt_at = NULL
             WHERE id = ?1 AND status = 'pending'
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)",
            params![id.to_string(), format_timestamp(&now)],
        )?;
        Ok(changed == 1)
    })
}

/// pending → processing for the retry that follows `retry_count` failures.
///
/// Used by backoff timers. Refuses once the job has moved on to another
/// attempt, so a timer that fires late cannot cut a newer backoff short.
pub fn claim_attempt(
    db: &Database,
    id: Uuid,
    retry_count: u32,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs
             SET status = 'processing', started_at = COALESCE(started_at, ?2),
                 next_attempt_at = NULL
             WHERE id = ?1 AND status = 'pending' AND retry_count = ?3",
            params![id.to_string(), format_timestamp(&now), retry_count],
        )?;
        Ok(changed == 1)
    })
}

/// processing → pending after a failed attempt, consuming one retry.
///
/// Refuses (returns `false`) when the retry budget is already spent.
pub fn requeue(
    db: &Database,
    id: Uuid,
    error_message: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs
             SET status = 'pending', retry_count = retry_count + 1, error_message = ?2,
                 next_attempt_at = ?3
             WHERE id = ?1 AND status = 'processing' AND retry_count < max_retries",
            params![id.to_string(), error_message, format_timestamp(&next_attempt_at)],
        )?;
        Ok(changed == 1)
    })
}

/// processing → failed.
pub fn fail(
    db: &Database,
    id: Uuid,
    error_message: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs
             SET status = 'failed', progress = 0, error_message = ?2, completed_at = ?3
             WHERE id = ?1 AND status = 'processing'",
            params![id.to_string(), error_message, format_timestamp(&now)],
        )?;
        Ok(changed == 1)
    })
}

/// processing → completed together with the result insert, in one transaction.
///
/// If the job is no longer processing nothing is written. If the result
/// insert fails the transaction is rolled back and the error returned, leaving
/// the job in `processing` for the caller to fail.
pub fn complete_with_result(
    db: &Database,
    result: &OcrResult,
    now: DateTime<Utc>,
) -> Result<Completion, DatabaseError> {
    let structured_data = result
        .structured_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| DatabaseError::Corrupt {
            column: "structured_data",
            value: e.to_string(),
        })?;

    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let changed = tx.execute(
            "UPDATE ocr_jobs
             SET status = 'completed', progress = 100, completed_at = ?2, error_message = NULL
             WHERE id = ?1 AND status = 'processing'",
            params![result.job_id.to_string(), format_timestamp(&now)],
        )?;
        if changed == 0 {
            tx.rollback()?;
            return Ok(Completion::Superseded);
        }

        tx.execute(
            "INSERT INTO ocr_results (id, job_id, document_id, raw_text, markdown_text,
             structured_data, confidence, processing_time_ms, num_pages, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                result.id.to_string(),
                result.job_id.to_string(),
                result.document_id.to_string(),
                result.raw_text,
                result.markdown_text,
                structured_data,
                result.confidence,
                result.processing_time_ms as i64,
                result.num_pages,
                format_timestamp(&result.created_at),
            ],
        )?;

        tx.commit()?;
        Ok(Completion::Completed)
    })
}

/// pending/processing → cancelled. Progress is left as it was.
pub fn cancel(db: &Database, id: Uuid, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs
             SET status = 'cancelled', completed_at = ?2, next_attempt_at = NULL
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id.to_string(), format_timestamp(&now)],
        )?;
        Ok(changed == 1)
    })
}

/// Raises the progress of a processing job. Never lowers it.
pub fn update_progress(db: &Database, id: Uuid, progress: u8) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs SET progress = MAX(progress, ?2)
             WHERE id = ?1 AND status = 'processing'",
            params![id.to_string(), progress.min(100)],
        )?;
        Ok(changed == 1)
    })
}

/// Returns jobs stranded in `processing` to `pending` without consuming a retry.
///
/// Only safe while no dispatch is running in this process, i.e. at startup.
pub fn reset_orphaned(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE ocr_jobs SET status = 'pending', next_attempt_at = NULL
             WHERE status = 'processing'",
            [],
        )?;
        Ok(changed)
    })
}

/// Deletes a job in a terminal state; its result goes with it.
pub fn delete_terminal(db: &Database, id: Uuid) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM ocr_jobs
             WHERE id = ?1 AND status IN ('completed', 'failed', 'cancelled')",
            params![id.to_string()],
        )?;
        Ok(changed == 1)
    })
}
