pub mod config;
pub mod db;
pub mod documents;
pub mod engine;
pub mod error;
pub mod guard;
pub mod job;
pub mod logging;
pub mod queue;
pub mod scheduler;

pub use config::{load_config, load_or_default, Config};
pub use db::{Database, DatabaseError};
pub use documents::{Document, DocumentSource};
pub use engine::{EngineError, EngineOutput, HttpEngineClient, OcrEngine};
pub use error::{ConfigError, JobError, OcrJobsError, Result};
pub use job::{Job, JobPage, JobStatus, OcrMode, OcrResult, Pagination, ResolutionMode, SubmitRequest};
pub use queue::QueueReader;
pub use scheduler::{DispatchOutcome, JobScheduler, QueueSweeper, RecoveryReport, RetryPolicy};
