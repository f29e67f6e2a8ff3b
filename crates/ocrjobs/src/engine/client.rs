//! HTTP client for the OCR engine service.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::{EngineError, EngineOutput, OcrEngine};
use crate::config::EngineConfig;
use crate::job::{OcrMode, ResolutionMode};

/// Engine calls are long-running; bounded so a stuck engine cannot hang a job forever.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Default connect timeout (10 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of `POST /ocr/process`.
#[derive(Debug, Deserialize)]
struct ProcessResponse {
    success: bool,
    #[serde(default)]
    text: String,
    #[serde(default)]
    markdown: String,
    #[serde(default)]
    structured_data: Option<serde_json::Value>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    processing_time_ms: u64,
    #[serde(default)]
    num_pages: u32,
    #[serde(default)]
    error: Option<String>,
}

/// Talks to the engine over HTTP. Stateless apart from the connection pool.
#[derive(Debug, Clone)]
pub struct HttpEngineClient {
    base_url: String,
    timeout: Duration,
    http: Client,
}

impl HttpEngineClient {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, EngineError> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            http,
        })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.connect_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn transport_error(&self, err: reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Transport(format!(
                "request timed out after {}s",
                self.timeout.as_secs()
            ))
        } else {
            EngineError::Transport(format!("request failed: {}", err))
        }
    }

    /// `GET /health`; any status other than 200 means unhealthy.
    pub async fn health_check(&self) -> Result<(), EngineError> {
        let response = self
            .http
            .get(self.url("/health"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if response.status() != StatusCode::OK {
            return Err(EngineError::Engine(format!(
                "engine unhealthy: status {}",
                response.status().as_u16()
            )));
        }
        Ok(())
    }

    /// `GET /status`, returned as opaque JSON.
    pub async fn status(&self) -> Result<serde_json::Value, EngineError> {
        let response = self
            .http
            .get(self.url("/status"))
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        response
            .json()
            .await
            .map_err(|e| EngineError::Protocol(format!("failed to decode status: {}", e)))
    }
}

#[async_trait]
impl OcrEngine for HttpEngineClient {
    async fn process(
        &self,
        file_path: &Path,
        mode: OcrMode,
        resolution: ResolutionMode,
    ) -> Result<EngineOutput, EngineError> {
        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            EngineError::Transport(format!(
                "failed to read document '{}': {}",
                file_path.display(),
                e
            ))
        })?;

        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let mime = mime_guess::from_path(file_path).first_or_octet_stream();

        let part = Part::bytes(bytes)
            .file_name(file_name.clone())
            .mime_str(mime.essence_str())
            .map_err(|e| EngineError::Transport(format!("invalid MIME type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("mode", mode.as_str())
            .text("resolution", resolution.as_str());

        log::info!(
            "Sending OCR request for {} (mode={}, resolution={})",
            file_name,
            mode,
            resolution
        );
        let started = Instant::now();

        let response = self
            .http
            .post(self.url("/ocr/process"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if status != StatusCode::OK {
            let text = String::from_utf8_lossy(&body);
            log::error!("OCR engine returned status {}: {}", status.as_u16(), text);
            return Err(EngineError::Engine(format!(
                "engine returned status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: ProcessResponse = serde_json::from_slice(&body)
            .map_err(|e| EngineError::Protocol(format!("failed to parse response: {}", e)))?;

        if !parsed.success {
            let message = parsed
                .error
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "engine reported failure without a message".to_string());
            return Err(EngineError::Engine(message));
        }

        log::info!(
            "OCR request for {} finished in {}ms (engine reported {}ms, confidence {:.2})",
            file_name,
            started.elapsed().as_millis(),
            parsed.processing_time_ms,
            parsed.confidence
        );

        Ok(EngineOutput {
            text: parsed.text,
            markdown: parsed.markdown,
            structured_data: parsed.structured_data,
            confidence: parsed.confidence,
            processing_time_ms: parsed.processing_time_ms,
            num_pages: parsed.num_pages,
        })
    }
}
