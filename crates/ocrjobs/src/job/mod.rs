//! Job domain types: status machine, processing parameters and the job record.

pub mod page;
pub mod result;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;

pub use page::{JobPage, PageRequest, Pagination};
pub use result::OcrResult;

/// Opaque key/value payload attached to a job by the submitter.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lowest accepted job priority.
pub const MIN_PRIORITY: i32 = 0;
/// Highest accepted job priority.
pub const MAX_PRIORITY: i32 = 10;
/// Retry budget given to every job unless the scheduler is configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Life cycle state of a job.
///
/// `Pending` is initial; `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true when no further transitions are permitted.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Pending and processing jobs can be cancelled but not deleted.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| JobError::validation("status", format!("unknown job status '{}'", s)))
    }
}

/// What kind of content the engine should expect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    Document,
    Handwritten,
    General,
    Figure,
}

impl OcrMode {
    pub const ALL: [OcrMode; 4] = [
        OcrMode::Document,
        OcrMode::Handwritten,
        OcrMode::General,
        OcrMode::Figure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Document => "document",
            OcrMode::Handwritten => "handwritten",
            OcrMode::General => "general",
            OcrMode::Figure => "figure",
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OcrMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                JobError::validation(
                    "ocr_mode",
                    format!(
                        "unknown mode '{}', expected one of document, handwritten, general, figure",
                        s
                    ),
                )
            })
    }
}

/// Engine input resolution, from fastest (`Tiny`) to most detailed (`Gundam`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionMode {
    Tiny,
    Small,
    Base,
    Large,
    Gundam,
}

impl ResolutionMode {
    pub const ALL: [ResolutionMode; 5] = [
        ResolutionMode::Tiny,
        ResolutionMode::Small,
        ResolutionMode::Base,
        ResolutionMode::Large,
        ResolutionMode::Gundam,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionMode::Tiny => "tiny",
            ResolutionMode::Small => "small",
            ResolutionMode::Base => "base",
            ResolutionMode::Large => "large",
            ResolutionMode::Gundam => "gundam",
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResolutionMode {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResolutionMode::ALL
            .into_iter()
            .find(|res| res.as_str() == s)
            .ok_or_else(|| {
                JobError::validation(
                    "resolution_mode",
                    format!(
                        "unknown resolution '{}', expected one of tiny, small, base, large, gundam",
                        s
                    ),
                )
            })
    }
}

/// Parameters of a single job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub document_id: Uuid,
    pub ocr_mode: OcrMode,
    pub resolution_mode: ResolutionMode,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SubmitRequest {
    /// A submission with `document` mode, `base` resolution and priority 0.
    pub fn new(document_id: Uuid) -> Self {
        Self {
            document_id,
            ocr_mode: OcrMode::Document,
            resolution_mode: ResolutionMode::Base,
            priority: 0,
            metadata: Metadata::new(),
        }
    }

    /// Builds a submission from the raw strings an API tier receives.
    pub fn parse(
        document_id: Uuid,
        ocr_mode: &str,
        resolution_mode: &str,
        priority: i32,
    ) -> Result<Self, JobError> {
        let request = Self {
            document_id,
            ocr_mode: ocr_mode.parse()?,
            resolution_mode: resolution_mode.parse()?,
            priority,
            metadata: Metadata::new(),
        };
        request.validate()?;
        Ok(request)
    }

    pub fn with_mode(mut self, mode: OcrMode) -> Self {
        self.ocr_mode = mode;
        self
    }

    pub fn with_resolution(mut self, resolution: ResolutionMode) -> Self {
        self.resolution_mode = resolution;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn validate(&self) -> Result<(), JobError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&self.priority) {
            return Err(JobError::validation(
                "priority",
                format!(
                    "{} is outside {}..={}",
                    self.priority, MIN_PRIORITY, MAX_PRIORITY
                ),
            ));
        }
        Ok(())
    }
}

/// A tracked unit of requested OCR work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub status: JobStatus,
    pub ocr_mode: OcrMode,
    pub resolution_mode: ResolutionMode,
    pub priority: i32,
    pub retry_count: u32,
    pub max_retries: u32,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Earliest time a retried job may be dispatched again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

impl Job {
    /// Creates a fresh pending job for `user_id`.
    pub fn new(request: SubmitRequest, user_id: Uuid, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_id: request.document_id,
            user_id,
            status: JobStatus::Pending,
            ocr_mode: request.ocr_mode,
            resolution_mode: request.resolution_mode,
            priority: request.priority,
            retry_count: 0,
            max_retries,
            progress: 0,
            created_at: Utc::now().trunc_subsecs(6),
            started_at: None,
            completed_at: None,
            error_message: None,
            next_attempt_at: None,
            metadata: request.metadata,
        }
    }

    /// Whether another failed attempt can still be retried.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}
