use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::EngineOutput;

/// Engine output stored for a successfully completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrResult {
    pub id: Uuid,
    pub job_id: Uuid,
    pub document_id: Uuid,
    pub raw_text: String,
    pub markdown_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_data: Option<serde_json::Value>,
    /// Engine confidence in `0.0..=1.0`.
    pub confidence: f64,
    pub processing_time_ms: u64,
    pub num_pages: u32,
    pub created_at: DateTime<Utc>,
}

impl OcrResult {
    pub fn from_output(job_id: Uuid, document_id: Uuid, output: EngineOutput) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            document_id,
            raw_text: output.text,
            markdown_text: output.markdown,
            structured_data: output.structured_data,
            confidence: output.confidence.clamp(0.0, 1.0),
            processing_time_ms: output.processing_time_ms,
            num_pages: output.num_pages,
            created_at: Utc::now().trunc_subsecs(6),
        }
    }
}
