//! OCR backend abstraction for image uploads.
//!
//! Image extraction delegates to an external vision-capable model; the
//! production client posts the image to an Ollama runtime. The trait keeps
//! the pipeline testable without a live backend.

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced while transcribing an image.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Backend was unreachable or timed out.
    #[error("OCR backend unavailable: {0}")]
    ProviderUnavailable(String),
    /// Backend returned an error response.
    #[error("Failed to transcribe image: {0}")]
    RecognitionFailed(String),
    /// Backend response could not be parsed.
    #[error("Malformed OCR response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by OCR backends.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Transcribe all readable text from the supplied image bytes.
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError>;
}

const OCR_PROMPT: &str =
    "Transcribe all text visible in this image. Return only the transcribed text, \
     preserving line breaks. If the image contains no readable text, return an empty response.";

/// OCR client backed by a vision model served from an Ollama runtime.
pub struct OllamaOcrClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaOcrClient {
    /// Construct a client for the given Ollama base URL and vision model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("docpilot/ocr")
            .build()
            .expect("Failed to construct reqwest::Client for OCR");
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl OcrClient for OllamaOcrClient {
    async fn recognize(&self, image: &[u8]) -> Result<String, OcrError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let payload = json!({
            "model": self.model,
            "prompt": OCR_PROMPT,
            "images": [encoded],
            "stream": false,
            "options": {
                "temperature": 0.0,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                OcrError::ProviderUnavailable(format!(
                    "failed to reach OCR backend at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(OcrError::ProviderUnavailable(format!(
                "OCR endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::RecognitionFailed(format!(
                "OCR backend returned {status}: {body}"
            )));
        }

        let body: OllamaGenerateResponse = response.json().await.map_err(|error| {
            OcrError::InvalidResponse(format!("failed to decode OCR response: {error}"))
        })?;

        if !body.done {
            return Err(OcrError::InvalidResponse(
                "OCR response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}
