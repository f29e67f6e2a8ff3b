//! Read side of the pending queue.
//!
//! Results are snapshots: calling again re-reads the store, so a sweep that
//! is interrupted can simply start over.

use chrono::{DateTime, Utc};

use crate::db::{job_repo, Database, DatabaseError};
use crate::job::Job;

#[derive(Clone)]
pub struct QueueReader {
    db: Database,
}

impl QueueReader {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Pending jobs, highest priority first, oldest first within a priority.
    pub fn pending(&self, limit: u32) -> Result<Vec<Job>, DatabaseError> {
        job_repo::list_pending(&self.db, limit)
    }

    /// Pending jobs that are not waiting out a retry backoff at `now`.
    pub fn due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Job>, DatabaseError> {
        job_repo::list_due(&self.db, now, limit)
    }

    pub fn next_due(&self, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        Ok(self.due(now, 1)?.into_iter().next())
    }
}
