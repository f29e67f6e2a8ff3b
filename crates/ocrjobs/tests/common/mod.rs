//! Shared fixtures for scheduler integration tests.
//!
//! - `ScriptedEngine` replays a fixed list of engine outcomes
//! - `GatedEngine` holds every call until the test releases it
//! - `TestHarness` wires an in-memory database, a scheduler and one user

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use uuid::Uuid;

use ocrjobs::db::{document_repo, job_repo, result_repo};
use ocrjobs::scheduler::RetryPolicy;
use ocrjobs::{
    Database, Document, EngineError, EngineOutput, Job, JobScheduler, JobStatus, OcrEngine,
    OcrMode, ResolutionMode,
};

pub const TEST_RETRY_DELAY: Duration = Duration::from_millis(20);
const WAIT_LIMIT: Duration = Duration::from_secs(5);
const POLL_EVERY: Duration = Duration::from_millis(5);

pub fn output(text: &str) -> EngineOutput {
    EngineOutput {
        text: text.to_string(),
        markdown: format!("# {}", text),
        structured_data: Some(serde_json::json!({ "source": text })),
        confidence: 0.93,
        processing_time_ms: 250,
        num_pages: 1,
    }
}

pub fn engine_failure(n: usize) -> EngineError {
    EngineError::Engine(format!("failure {}", n))
}

/// Replays scripted outcomes in order, then succeeds with "default" output.
#[derive(Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<EngineOutput, EngineError>>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(PathBuf, OcrMode, ResolutionMode)>>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<EngineOutput, EngineError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(PathBuf, OcrMode, ResolutionMode)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    async fn process(
        &self,
        file_path: &Path,
        mode: OcrMode,
        resolution: ResolutionMode,
    ) -> Result<EngineOutput, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((file_path.to_path_buf(), mode, resolution));
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(output("default")))
    }
}

/// Blocks each call until `release` is notified, then delegates.
pub struct GatedEngine {
    inner: ScriptedEngine,
    pub entered: Notify,
    pub release: Notify,
    finished: AtomicUsize,
}

impl GatedEngine {
    pub fn new(script: Vec<Result<EngineOutput, EngineError>>) -> Self {
        Self {
            inner: ScriptedEngine::new(script),
            entered: Notify::new(),
            release: Notify::new(),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub async fn wait_finished(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        while self.finished() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "engine did not finish {} calls in time",
                count
            );
            tokio::time::sleep(POLL_EVERY).await;
        }
        // Let the dispatch task record the outcome.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[async_trait]
impl OcrEngine for GatedEngine {
    async fn process(
        &self,
        file_path: &Path,
        mode: OcrMode,
        resolution: ResolutionMode,
    ) -> Result<EngineOutput, EngineError> {
        self.entered.notify_one();
        self.release.notified().await;
        let result = self.inner.process(file_path, mode, resolution).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

pub struct TestHarness {
    pub db: Database,
    pub scheduler: JobScheduler,
    pub user: Uuid,
}

impl TestHarness {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self::with_policy(engine, RetryPolicy::new(3, TEST_RETRY_DELAY))
    }

    pub fn with_policy(engine: Arc<dyn OcrEngine>, policy: RetryPolicy) -> Self {
        let db = Database::open_in_memory().expect("Failed to open in-memory DB");
        Self::on_database(db, engine, policy)
    }

    pub fn on_database(db: Database, engine: Arc<dyn OcrEngine>, policy: RetryPolicy) -> Self {
        let documents = Arc::new(db.clone());
        let scheduler = JobScheduler::new(db.clone(), documents, engine, policy);
        Self {
            db,
            scheduler,
            user: Uuid::new_v4(),
        }
    }

    pub fn add_document(&self) -> Document {
        self.add_document_for(self.user)
    }

    pub fn add_document_for(&self, owner: Uuid) -> Document {
        let doc = Document::new(owner, format!("/data/{}/{}.pdf", owner, Uuid::new_v4()));
        document_repo::insert(&self.db, &doc).expect("insert document");
        doc
    }

    pub fn job(&self, id: Uuid) -> Job {
        job_repo::find_by_id(&self.db, id)
            .expect("read job")
            .expect("job exists")
    }

    pub fn has_result(&self, id: Uuid) -> bool {
        result_repo::find_by_job_id(&self.db, id)
            .expect("read result")
            .is_some()
    }

    pub async fn wait_for_status(&self, id: Uuid, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let job = self.job(id);
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} stuck in {} waiting for {}",
                id,
                job.status,
                status
            );
            tokio::time::sleep(POLL_EVERY).await;
        }
    }

    pub async fn wait_for_terminal(&self, id: Uuid) -> Job {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let job = self.job(id);
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {} never reached a terminal state (last: {})",
                id,
                job.status
            );
            tokio::time::sleep(POLL_EVERY).await;
        }
    }

    /// Checks the store-wide invariants on every job.
    pub fn assert_invariants(&self) {
        let jobs = self.all_jobs();
        for job in jobs {
            assert_eq!(
                job.completed_at.is_some(),
                job.status.is_terminal(),
                "completed_at must be set exactly for terminal jobs: {:?}",
                job
            );
            assert!(job.retry_count <= job.max_retries, "{:?}", job);
            assert_eq!(
                self.has_result(job.id),
                job.status == JobStatus::Completed,
                "result must exist exactly for completed jobs: {:?}",
                job
            );
        }
    }

    fn all_jobs(&self) -> Vec<Job> {
        let ids: Vec<String> = self
            .db
            .with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT id FROM ocr_jobs")?;
                let ids = stmt
                    .query_map([], |r| r.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(ids)
            })
            .expect("list job ids");
        ids.iter()
            .map(|id| self.job(Uuid::parse_str(id).expect("uuid")))
            .collect()
    }

    /// Makes every result insert fail from now on.
    pub fn break_result_writes(&self) {
        self.db
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_results BEFORE INSERT ON ocr_results
                     BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
                )?;
                Ok(())
            })
            .expect("install trigger");
    }
}
