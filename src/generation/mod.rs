//! Generative model clients, batch and streaming.
//!
//! Summaries and answers are produced through the [`GenerationClient`] trait.
//! The production client talks to an Ollama runtime; batch calls return the
//! complete response while streaming calls expose a lazy, finite token stream.
//! Dropping a [`TokenStream`] drops the underlying HTTP response, which aborts
//! the generation call server-side.

use crate::retry::Transient;
use async_stream::try_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::pin::Pin;
use thiserror::Error;

/// Errors surfaced by generation providers.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider was unreachable, timed out, or rate-limited; worth retrying.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response or failed mid-generation.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl Transient for GenerationError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

/// Lazy, finite, non-restartable sequence of answer fragments.
///
/// A failure mid-stream surfaces as a terminal `Err` item; consumers must not
/// assume a silently truncated stream is complete.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

/// Interface implemented by generative model backends.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a complete response for the prompt.
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Generate a response as an incremental fragment stream.
    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream, GenerationError>;
}

/// Generation client backed by an Ollama runtime's `/api/generate` endpoint.
pub struct OllamaGenerationClient {
    http: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    done: bool,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaStreamChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

enum StreamEvent {
    Fragment(String),
    Done(String),
}

impl OllamaGenerationClient {
    /// Construct a client for the given Ollama base URL and model.
    pub fn new(base_url: String, model: String) -> Self {
        let http = Client::builder()
            .user_agent("docpilot/generate")
            .build()
            .expect("Failed to construct reqwest::Client for generation");
        Self {
            http,
            base_url,
            model,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, prompt: &str, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": stream,
            "options": {
                "temperature": 0.2,
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationError::ProviderUnavailable(format!(
                    "failed to reach generation backend at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GenerationError::ProviderUnavailable(format!(
                "generation endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::ProviderUnavailable(format!(
                "generation backend returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::GenerationFailed(format!(
                "generation backend returned {status}: {body}"
            )));
        }
        Ok(response)
    }
}

/// Parse one NDJSON line from the Ollama streaming response.
fn parse_stream_line(line: &str) -> Result<StreamEvent, GenerationError> {
    let chunk: OllamaStreamChunk = serde_json::from_str(line).map_err(|error| {
        GenerationError::InvalidResponse(format!("failed to decode stream chunk: {error}"))
    })?;
    if let Some(error) = chunk.error {
        return Err(GenerationError::GenerationFailed(error));
    }
    if chunk.done {
        Ok(StreamEvent::Done(chunk.response))
    } else {
        Ok(StreamEvent::Fragment(chunk.response))
    }
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let response = self.send(prompt, false).await?;
        let body: OllamaGenerateResponse = response.json().await.map_err(|error| {
            GenerationError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationError::InvalidResponse(
                "generation response incomplete".into(),
            ));
        }
        Ok(body.response.trim().to_string())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<TokenStream, GenerationError> {
        let response = self.send(prompt, true).await?;
        let bytes = response.bytes_stream();

        let stream = try_stream! {
            futures_util::pin_mut!(bytes);
            let mut buffer = String::new();
            let mut finished = false;

            while !finished {
                let Some(chunk) = bytes.next().await else {
                    break;
                };
                let chunk = chunk.map_err(|error| {
                    GenerationError::ProviderUnavailable(format!("stream interrupted: {error}"))
                })?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = buffer.find('\n') {
                    let line = buffer[..newline].trim().to_string();
                    buffer.drain(..=newline);
                    if line.is_empty() {
                        continue;
                    }
                    match parse_stream_line(&line)? {
                        StreamEvent::Fragment(text) => {
                            if !text.is_empty() {
                                yield text;
                            }
                        }
                        StreamEvent::Done(text) => {
                            if !text.is_empty() {
                                yield text;
                            }
                            finished = true;
                            break;
                        }
                    }
                }
            }

            let trailing = buffer.trim().to_string();
            if !finished && !trailing.is_empty() {
                match parse_stream_line(&trailing)? {
                    StreamEvent::Fragment(text) | StreamEvent::Done(text) => {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn generate_returns_trimmed_response() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama3.1".into());

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"stream\":false");
                then.status(200).json_body(json!({
                    "response": "  An answer.  ",
                    "done": true
                }));
            })
            .await;

        let answer = client.generate("question").await.expect("answer");
        mock.assert();
        assert_eq!(answer, "An answer.");
    }

    #[tokio::test]
    async fn generate_stream_yields_fragments_in_order() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama3.1".into());

        let body = concat!(
            "{\"response\":\"Hello\",\"done\":false}\n",
            "{\"response\":\" world\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        );
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"stream\":true");
                then.status(200).body(body);
            })
            .await;

        let mut stream = client.generate_stream("question").await.expect("stream");
        let mut fragments = Vec::new();
        while let Some(item) = stream.next().await {
            fragments.push(item.expect("fragment"));
        }
        assert_eq!(fragments, vec!["Hello".to_string(), " world".to_string()]);
    }

    #[tokio::test]
    async fn mid_stream_error_is_a_terminal_item() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama3.1".into());

        let body = concat!(
            "{\"response\":\"partial\",\"done\":false}\n",
            "{\"error\":\"model crashed\"}\n",
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200).body(body);
            })
            .await;

        let mut stream = client.generate_stream("question").await.expect("stream");
        let first = stream.next().await.expect("first item").expect("fragment");
        assert_eq!(first, "partial");
        let second = stream.next().await.expect("second item");
        assert!(matches!(second, Err(GenerationError::GenerationFailed(_))));
    }

    #[tokio::test]
    async fn server_errors_classify_as_transient() {
        let server = MockServer::start_async().await;
        let client = OllamaGenerationClient::new(server.base_url(), "llama3.1".into());

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(503).body("overloaded");
            })
            .await;

        let error = client.generate("question").await.expect_err("error");
        assert!(error.is_transient());
    }

    #[test]
    fn parse_stream_line_distinguishes_events() {
        assert!(matches!(
            parse_stream_line("{\"response\":\"hi\",\"done\":false}").unwrap(),
            StreamEvent::Fragment(text) if text == "hi"
        ));
        assert!(matches!(
            parse_stream_line("{\"response\":\"\",\"done\":true}").unwrap(),
            StreamEvent::Done(_)
        ));
        assert!(parse_stream_line("{not json").is_err());
    }
}
