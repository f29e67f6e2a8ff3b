//! Running one job: claim it, call the engine, record the outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::retry::RetryDecision;
use super::Inner;
use crate::db::job_repo::{self, Completion};
use crate::db::DatabaseError;
use crate::engine::EngineError;
use crate::job::{Job, OcrResult};

/// What a single dispatch attempt did to its job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The job was not claimable: another dispatch owns it, it was
    /// cancelled, or it is waiting out a backoff.
    Skipped,
    Completed,
    /// Requeued; another attempt is scheduled after `delay`.
    Retrying { attempt: u32, delay: Duration },
    Failed,
    /// The job left `processing` while the engine ran; the outcome was dropped.
    Superseded,
}

/// Why a dispatch was started. Decides how the job is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Trigger {
    /// Submission, sweep, pull or recovery. The job must be due.
    Due,
    /// Backoff timer for the attempt after `retry_count` failures.
    Retry { retry_count: u32, delay: Duration },
}

/// Dispatch tasks that have been spawned and not yet finished.
#[derive(Debug, Default)]
pub(super) struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub(super) fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Resolves once no dispatch task is running.
    pub(super) async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.len() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Held by a dispatch task for its whole life, including an aborted one.
struct InFlightGuard(Arc<Inner>);

impl InFlightGuard {
    fn enter(inner: &Arc<Inner>) -> Self {
        inner.in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.in_flight.idle.notify_waiters();
        }
    }
}

/// Spawns a dispatch of `job_id`.
///
/// Retry dispatches first sleep for their backoff and are abandoned when the
/// scheduler shuts down; the job stays pending with its `next_attempt_at`
/// and is picked up by the next recovery.
pub(super) fn spawn_dispatch(
    inner: Arc<Inner>,
    job_id: Uuid,
    trigger: Trigger,
) -> JoinHandle<()> {
    let mut shutdown = inner.shutdown.subscribe();
    let guard = InFlightGuard::enter(&inner);
    let span = tracing::info_span!("dispatch", job_id = %job_id);

    tokio::spawn(
        async move {
            let _guard = guard;

            if let Trigger::Retry { delay, .. } = trigger {
                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        log::debug!("Scheduler stopping, dropping retry timer for job {}", job_id);
                        return;
                    }
                }
            }

            if let Err(e) = inner.dispatch(job_id, trigger).await {
                log::error!("Dispatch of job {} aborted: {}", job_id, e);
            }
        }
        .instrument(span),
    )
}

impl Inner {
    pub(super) async fn dispatch(
        self: &Arc<Self>,
        job_id: Uuid,
        trigger: Trigger,
    ) -> Result<DispatchOutcome, DatabaseError> {
        let now = Utc::now();
        let claimed = match trigger {
            Trigger::Due => job_repo::claim(&self.db, job_id, now)?,
            Trigger::Retry { retry_count, .. } => {
                job_repo::claim_attempt(&self.db, job_id, retry_count, now)?
            }
        };
        if !claimed {
            log::debug!("Job {} is not claimable, skipping dispatch", job_id);
            return Ok(DispatchOutcome::Skipped);
        }

        match self.run_claimed(job_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                log::error!("Store error while processing job {}: {}", job_id, e);
                self.fail_stranded(job_id, &e)
            }
        }
    }

    /// Everything after the claim. The job is `processing` on entry.
    async fn run_claimed(
        self: &Arc<Self>,
        job_id: Uuid,
    ) -> Result<DispatchOutcome, DatabaseError> {
        let Some(job) = job_repo::find_by_id(&self.db, job_id)? else {
            return Ok(DispatchOutcome::Skipped);
        };

        log::info!(
            "Processing job {} (attempt {} of {})",
            job.id,
            job.retry_count + 1,
            job.max_retries + 1
        );

        let document = match self.documents.get_document(job.document_id) {
            Ok(Some(document)) => document,
            Ok(None) => {
                return self.fail(job.id, &format!("document {} not found", job.document_id));
            }
            Err(e) => {
                return self.fail(job.id, &format!("failed to load document: {}", e));
            }
        };

        let outcome = self
            .engine
            .process(&document.file_path, job.ocr_mode, job.resolution_mode)
            .await;

        match outcome {
            Ok(output) => {
                let result = OcrResult::from_output(job.id, job.document_id, output);
                match job_repo::complete_with_result(&self.db, &result, Utc::now()) {
                    Ok(Completion::Completed) => {
                        log::info!("Job {} completed, result {}", job.id, result.id);
                        Ok(DispatchOutcome::Completed)
                    }
                    Ok(Completion::Superseded) => {
                        log::info!(
                            "Job {} was cancelled while processing, discarding result",
                            job.id
                        );
                        Ok(DispatchOutcome::Superseded)
                    }
                    Err(e) => {
                        log::error!("Failed to save result for job {}: {}", job.id, e);
                        self.fail(job.id, &format!("failed to save result: {}", e))
                    }
                }
            }
            Err(err) => self.handle_engine_failure(&job, err),
        }
    }

    fn handle_engine_failure(
        self: &Arc<Self>,
        job: &Job,
        err: EngineError,
    ) -> Result<DispatchOutcome, DatabaseError> {
        let message = format!("OCR processing failed: {}", err);

        match self.policy.decide(job, &err) {
            RetryDecision::Retry { attempt, delay } => {
                let backoff =
                    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                if !job_repo::requeue(&self.db, job.id, &message, Utc::now() + backoff)? {
                    log::info!("Job {} left processing before it could be retried", job.id);
                    return Ok(DispatchOutcome::Superseded);
                }

                log::warn!(
                    "Job {} failed, retry {}/{} in {:?}: {}",
                    job.id,
                    attempt,
                    job.max_retries,
                    delay,
                    err
                );
                spawn_dispatch(
                    Arc::clone(self),
                    job.id,
                    Trigger::Retry {
                        retry_count: job.retry_count + 1,
                        delay,
                    },
                );
                Ok(DispatchOutcome::Retrying { attempt, delay })
            }
            RetryDecision::GiveUp => self.fail(job.id, &message),
        }
    }

    fn fail(&self, job_id: Uuid, message: &str) -> Result<DispatchOutcome, DatabaseError> {
        if job_repo::fail(&self.db, job_id, message, Utc::now())? {
            log::error!("Job {} failed: {}", job_id, message);
            Ok(DispatchOutcome::Failed)
        } else {
            log::info!("Job {} left processing before it could be failed", job_id);
            Ok(DispatchOutcome::Superseded)
        }
    }

    /// Fails a claimed job after a store error so that it does not sit in
    /// `processing`, which nothing but recovery at startup would pick up.
    fn fail_stranded(
        &self,
        job_id: Uuid,
        cause: &DatabaseError,
    ) -> Result<DispatchOutcome, DatabaseError> {
        self.fail(job_id, &format!("internal error: {}", cause))
            .inspect_err(|e| {
                log::error!(
                    "Job {} left in processing until the next recovery: {}",
                    job_id,
                    e
                );
            })
    }
}
