//! The remote OCR engine: a single-attempt call wrapper with a fixed timeout.
//!
//! Retrying is the scheduler's business; nothing in this module retries.

pub mod client;
pub mod error;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::job::{OcrMode, ResolutionMode};

pub use client::HttpEngineClient;
pub use error::EngineError;

/// Extracted content returned by a successful engine call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub text: String,
    pub markdown: String,
    pub structured_data: Option<serde_json::Value>,
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub num_pages: u32,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Runs OCR over the file at `file_path`.
    async fn process(
        &self,
        file_path: &Path,
        mode: OcrMode,
        resolution: ResolutionMode,
    ) -> Result<EngineOutput, EngineError>;
}
