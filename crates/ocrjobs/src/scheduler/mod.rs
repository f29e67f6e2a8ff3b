//! Job scheduling: submission, dispatch, retries and the owner-facing API.
//!
//! Each job runs as its own tokio task. All coordination between tasks goes
//! through compare-and-set updates in the job store, so cancelling a job
//! while it is being processed is safe: whichever transition lands first
//! wins and the other becomes a no-op.

pub mod dispatch;
pub mod retry;
pub mod sweeper;

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::db::{job_repo, result_repo, Database};
use crate::documents::DocumentSource;
use crate::engine::OcrEngine;
use crate::error::JobError;
use crate::guard::authorize;
use crate::job::{
    Job, JobPage, JobStatus, OcrMode, OcrResult, PageRequest, Pagination, ResolutionMode,
    SubmitRequest,
};
use crate::queue::QueueReader;

use dispatch::{InFlight, Trigger};
pub use dispatch::DispatchOutcome;
pub use retry::{RetryDecision, RetryPolicy};
pub use sweeper::QueueSweeper;

/// Most documents accepted by a single batch submission.
pub const MAX_BATCH_SIZE: usize = 50;

pub(crate) struct Inner {
    db: Database,
    documents: Arc<dyn DocumentSource>,
    engine: Arc<dyn OcrEngine>,
    policy: RetryPolicy,
    queue: QueueReader,
    shutdown: watch::Sender<bool>,
    in_flight: InFlight,
}

/// Per-document failure inside a batch submission.
#[derive(Debug)]
pub struct BatchFailure {
    pub document_id: Uuid,
    pub error: JobError,
}

#[derive(Debug)]
pub struct BatchSubmission {
    pub jobs: Vec<Job>,
    pub failures: Vec<BatchFailure>,
}

/// What [`JobScheduler::recover`] found and restarted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Jobs found in `processing` and returned to `pending`.
    pub reset: usize,
    /// Pending jobs dispatched immediately.
    pub dispatched: usize,
    /// Pending jobs still inside their backoff window, given a timer.
    pub scheduled: usize,
}

/// Entry point for everything that touches jobs.
///
/// Cloning is cheap; clones share the same store, engine and timers.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        db: Database,
        documents: Arc<dyn DocumentSource>,
        engine: Arc<dyn OcrEngine>,
        policy: RetryPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                queue: QueueReader::new(db.clone()),
                db,
                documents,
                engine,
                policy,
                shutdown,
                in_flight: InFlight::default(),
            }),
        }
    }

    /// Builds a scheduler that reads documents from the same database.
    pub fn with_config(db: Database, engine: Arc<dyn OcrEngine>, config: &SchedulerConfig) -> Self {
        let documents: Arc<dyn DocumentSource> = Arc::new(db.clone());
        Self::new(db, documents, engine, RetryPolicy::from(config))
    }

    /// Creates a pending job for a document the caller owns and starts
    /// processing it in the background. Returns without waiting for the engine.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn submit(&self, request: SubmitRequest, caller: Uuid) -> Result<Job, JobError> {
        let job = self.create_job(request, caller)?;
        dispatch::spawn_dispatch(Arc::clone(&self.inner), job.id, Trigger::Due);
        Ok(job)
    }

    /// Submits up to [`MAX_BATCH_SIZE`] documents at priority 0. Documents
    /// that cannot be submitted are reported individually and do not stop
    /// the rest of the batch.
    pub async fn submit_batch(
        &self,
        document_ids: &[Uuid],
        mode: OcrMode,
        resolution: ResolutionMode,
        caller: Uuid,
    ) -> Result<BatchSubmission, JobError> {
        if document_ids.is_empty() || document_ids.len() > MAX_BATCH_SIZE {
            return Err(JobError::validation(
                "document_ids",
                format!(
                    "expected 1..={} documents, got {}",
                    MAX_BATCH_SIZE,
                    document_ids.len()
                ),
            ));
        }

        let mut batch = BatchSubmission {
            jobs: Vec::with_capacity(document_ids.len()),
            failures: Vec::new(),
        };

        for &document_id in document_ids {
            let request = SubmitRequest::new(document_id)
                .with_mode(mode)
                .with_resolution(resolution);
            match self.create_job(request, caller) {
                Ok(job) => {
                    dispatch::spawn_dispatch(Arc::clone(&self.inner), job.id, Trigger::Due);
                    batch.jobs.push(job);
                }
                Err(error) => batch.failures.push(BatchFailure { document_id, error }),
            }
        }

        log::info!(
            "Batch submitted for user {}: {} jobs created, {} failed",
            caller,
            batch.jobs.len(),
            batch.failures.len()
        );
        Ok(batch)
    }

    fn create_job(&self, request: SubmitRequest, caller: Uuid) -> Result<Job, JobError> {
        request.validate()?;

        let document = self
            .inner
            .documents
            .get_document(request.document_id)?
            .ok_or_else(|| JobError::not_found("document", request.document_id))?;
        authorize(document.user_id, caller).or_not_found("document", document.id)?;

        let job = Job::new(request, caller, self.inner.policy.max_retries);
        job_repo::insert(&self.inner.db, &job)?;

        log::info!(
            "Job {} submitted for document {} by user {} (priority {})",
            job.id,
            job.document_id,
            caller,
            job.priority
        );
        Ok(job)
    }

    /// Loads a job and checks the caller owns it.
    fn owned_job(&self, job_id: Uuid, caller: Uuid) -> Result<Job, JobError> {
        let job = job_repo::find_by_id(&self.inner.db, job_id)?
            .ok_or_else(|| JobError::not_found("job", job_id))?;
        authorize(job.user_id, caller).or_not_found("job", job_id)?;
        Ok(job)
    }

    pub fn get_job(&self, job_id: Uuid, caller: Uuid) -> Result<Job, JobError> {
        self.owned_job(job_id, caller)
    }

    /// The caller's jobs, newest first. Out-of-range paging values are clamped.
    pub fn list_jobs(
        &self,
        caller: Uuid,
        page: i64,
        per_page: i64,
        status: Option<JobStatus>,
    ) -> Result<JobPage, JobError> {
        let request = PageRequest::new(page, per_page);
        let (items, total) = job_repo::list_by_user(&self.inner.db, caller, status, request)?;
        Ok(JobPage {
            items,
            pagination: Pagination::new(request, total),
        })
    }

    /// Cancels a pending or processing job. An engine call already in flight
    /// keeps running, but its outcome is discarded.
    pub fn cancel_job(&self, job_id: Uuid, caller: Uuid) -> Result<Job, JobError> {
        let job = self.owned_job(job_id, caller)?;
        if job.status.is_terminal() {
            return Err(cannot_cancel(job.status));
        }

        if !job_repo::cancel(&self.inner.db, job_id, Utc::now())? {
            // Reached a terminal state between the read and the update.
            let current = self.owned_job(job_id, caller)?;
            return Err(cannot_cancel(current.status));
        }

        log::info!("Job {} cancelled by user {}", job_id, caller);
        self.owned_job(job_id, caller)
    }

    /// Deletes a finished job together with its result.
    pub fn delete_job(&self, job_id: Uuid, caller: Uuid) -> Result<(), JobError> {
        let job = self.owned_job(job_id, caller)?;
        if job.status.is_active() {
            return Err(JobError::InvalidState {
                message: format!(
                    "cannot delete a job with status {}, cancel it first",
                    job.status
                ),
            });
        }

        if !job_repo::delete_terminal(&self.inner.db, job_id)? {
            return Err(JobError::not_found("job", job_id));
        }

        log::info!("Job {} deleted by user {}", job_id, caller);
        Ok(())
    }

    pub fn get_result(&self, job_id: Uuid, caller: Uuid) -> Result<OcrResult, JobError> {
        self.owned_job(job_id, caller)?;
        result_repo::find_by_job_id(&self.inner.db, job_id)?
            .ok_or_else(|| JobError::not_found("result", job_id))
    }

    /// Pending jobs in dispatch order. Not scoped to a user.
    pub fn list_pending(&self, limit: u32) -> Result<Vec<Job>, JobError> {
        Ok(self.inner.queue.pending(limit)?)
    }

    /// Records engine progress for a processing job. Values above 100 are
    /// clamped and progress never moves backwards. Returns false when the
    /// job is not processing.
    pub fn update_progress(&self, job_id: Uuid, percent: u8) -> Result<bool, JobError> {
        Ok(job_repo::update_progress(
            &self.inner.db,
            job_id,
            percent.min(100),
        )?)
    }

    /// Dispatches the head of the due queue and waits for the attempt to
    /// finish. Returns `None` when nothing is due.
    pub async fn process_next(&self) -> Result<Option<(Uuid, DispatchOutcome)>, JobError> {
        let Some(job) = self.inner.queue.next_due(Utc::now())? else {
            return Ok(None);
        };
        let outcome = self.inner.dispatch(job.id, Trigger::Due).await?;
        Ok(Some((job.id, outcome)))
    }

    /// Spawns dispatches for up to `limit` due jobs. Returns how many were started.
    pub fn dispatch_due(&self, limit: u32) -> Result<usize, JobError> {
        let due = self.inner.queue.due(Utc::now(), limit)?;
        for job in &due {
            dispatch::spawn_dispatch(Arc::clone(&self.inner), job.id, Trigger::Due);
        }
        Ok(due.len())
    }

    /// Restarts work left behind by a previous process.
    ///
    /// Jobs stuck in `processing` are returned to `pending` without using a
    /// retry. Due pending jobs are dispatched now; jobs still inside their
    /// backoff window get a timer for the remainder. Call once at startup,
    /// from within a tokio runtime, before anything else dispatches.
    pub fn recover(&self) -> Result<RecoveryReport, JobError> {
        let reset = job_repo::reset_orphaned(&self.inner.db)?;
        if reset > 0 {
            log::warn!("Returned {} orphaned processing jobs to the queue", reset);
        }

        let mut report = RecoveryReport {
            reset,
            ..RecoveryReport::default()
        };

        let now = Utc::now();
        for job in self.inner.queue.pending(u32::MAX)? {
            let remaining = job
                .next_attempt_at
                .and_then(|at| (at - now).to_std().ok())
                .filter(|d| !d.is_zero());

            let trigger = match remaining {
                Some(delay) => {
                    report.scheduled += 1;
                    Trigger::Retry {
                        retry_count: job.retry_count,
                        delay,
                    }
                }
                None => {
                    report.dispatched += 1;
                    Trigger::Due
                }
            };
            dispatch::spawn_dispatch(Arc::clone(&self.inner), job.id, trigger);
        }

        log::info!(
            "Recovery finished: {} reset, {} dispatched, {} waiting for backoff",
            report.reset,
            report.dispatched,
            report.scheduled
        );
        Ok(report)
    }

    pub(crate) fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Stops retry timers and sweepers. In-flight engine calls finish normally;
    /// use [`JobScheduler::drain`] to wait for them.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        log::info!("Scheduler shutdown requested");
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// Number of spawned dispatches that have not finished, including retry
    /// timers still waiting out their backoff.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.len()
    }

    /// Waits until every spawned dispatch has finished. After
    /// [`JobScheduler::shutdown`] this means the running engine calls have
    /// been recorded and all retry timers are gone.
    pub async fn drain(&self) {
        let running = self.in_flight();
        if running > 0 {
            log::info!("Waiting for {} in-flight dispatches", running);
        }
        self.inner.in_flight.wait_idle().await;
    }
}

fn cannot_cancel(status: JobStatus) -> JobError {
    JobError::InvalidState {
        message: format!("cannot cancel a job with status {}", status),
    }
}
