//! Embedding client abstraction and provider adapters.
//!
//! Chunk and query text maps to fixed-dimension vectors through the
//! [`EmbeddingClient`] trait. Two HTTP providers are supported (Ollama and
//! OpenAI-compatible endpoints) plus a deterministic hash-projection client
//! used offline and in tests. Transient provider failures are classified via
//! [`Transient`] so the retry layer can tell them apart from rejections.

use crate::config::{Config, EmbeddingProvider};
use crate::retry::Transient;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Input exceeded the provider's accepted length.
    #[error("Embedding input too long: {actual} chars exceeds limit of {limit}")]
    InputTooLong {
        /// Maximum accepted input length in characters.
        limit: usize,
        /// Observed input length in characters.
        actual: usize,
    },
    /// Provider was unreachable, timed out, or rate-limited; worth retrying.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request; retrying will not help.
    #[error("Embedding provider rejected request: {0}")]
    ProviderRejected(String),
    /// Returned vector dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured for the pipeline.
        expected: usize,
        /// Dimension actually produced by the provider.
        actual: usize,
    },
    /// Provider returned fewer vectors than inputs.
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    MissingVectors {
        /// Number of inputs sent.
        expected: usize,
        /// Number of vectors received.
        actual: usize,
    },
}

impl Transient for EmbeddingError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_))
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, preserving order.
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Produce a single vector for a query string.
    async fn embed_query(&self, text: String) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(vec![text]).await?;
        vectors.pop().ok_or(EmbeddingError::MissingVectors {
            expected: 1,
            actual: 0,
        })
    }
}

/// Build an embedding client matching the configured provider.
pub fn build_embedding_client(config: &Config) -> Arc<dyn EmbeddingClient> {
    match config.embedding_provider {
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            config.embedding_max_chars,
        )),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.openai_api_key.clone().unwrap_or_default(),
            config.embedding_model.clone(),
            config.embedding_dimension,
            config.embedding_max_chars,
        )),
    }
}

fn check_input_lengths(texts: &[String], limit: usize) -> Result<(), EmbeddingError> {
    for text in texts {
        let actual = text.chars().count();
        if actual > limit {
            return Err(EmbeddingError::InputTooLong { limit, actual });
        }
    }
    Ok(())
}

fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<(), EmbeddingError> {
    for vector in vectors {
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}

fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        EmbeddingError::ProviderUnavailable(format!("provider returned {status}: {body}"))
    } else {
        EmbeddingError::ProviderRejected(format!("provider returned {status}: {body}"))
    }
}

/// Embedding client backed by an Ollama runtime's `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
    max_chars: usize,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaEmbeddingClient {
    /// Construct a client for the given base URL, model, and expected dimension.
    pub fn new(base_url: String, model: String, dimension: usize, max_chars: usize) -> Self {
        let http = Client::builder()
            .user_agent("docpilot/embed")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            model,
            dimension,
            max_chars,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_input_lengths(&texts, self.max_chars)?;
        let expected = texts.len();

        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::ProviderRejected(format!("failed to decode embed response: {error}"))
        })?;

        if body.embeddings.len() != expected {
            return Err(EmbeddingError::MissingVectors {
                expected,
                actual: body.embeddings.len(),
            });
        }
        check_dimensions(&body.embeddings, self.dimension)?;
        Ok(body.embeddings)
    }
}

/// Embedding client for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_chars: usize,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

impl OpenAiEmbeddingClient {
    /// Construct a client against the hosted OpenAI API.
    pub fn new(api_key: String, model: String, dimension: usize, max_chars: usize) -> Self {
        Self::with_base_url("https://api.openai.com".to_string(), api_key, model, dimension, max_chars)
    }

    /// Construct a client against a custom OpenAI-compatible endpoint.
    pub fn with_base_url(
        base_url: String,
        api_key: String,
        model: String,
        dimension: usize,
        max_chars: usize,
    ) -> Self {
        let http = Client::builder()
            .user_agent("docpilot/embed")
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url,
            api_key,
            model,
            dimension,
            max_chars,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        check_input_lengths(&texts, self.max_chars)?;
        let expected = texts.len();

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingError::ProviderUnavailable(format!(
                    "failed to reach embedding endpoint: {error}"
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let body: OpenAiEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingError::ProviderRejected(format!("failed to decode embed response: {error}"))
        })?;

        if body.data.len() != expected {
            return Err(EmbeddingError::MissingVectors {
                expected,
                actual: body.data.len(),
            });
        }
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.embedding).collect();
        check_dimensions(&vectors, self.dimension)?;
        Ok(vectors)
    }
}

/// Deterministic embedding client projecting text bytes into a unit vector.
///
/// Identical text always maps to the identical vector, normalized to unit
/// length so cosine similarity of a text with itself is `1.0`. Useful for
/// offline operation and for exercising the pipeline without a provider.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct a client producing vectors of the given dimension.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        if text.is_empty() || self.dimension == 0 {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if self.dimension == 0 {
            return Err(EmbeddingError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        Ok(texts.into_iter().map(|text| self.encode(&text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn hash_client_is_deterministic_and_normalized() {
        let client = HashEmbeddingClient::new(16);
        let first = client.embed(vec!["same text".into()]).await.unwrap();
        let second = client.embed(vec!["same text".into()]).await.unwrap();
        assert_eq!(first, second);

        let norm: f32 = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn input_too_long_is_rejected_before_any_call() {
        let client = OllamaEmbeddingClient::new(
            "http://127.0.0.1:1".into(),
            "nomic-embed-text".into(),
            4,
            10,
        );
        let error = client
            .embed(vec!["a".repeat(11)])
            .await
            .expect_err("length check");
        assert!(matches!(
            error,
            EmbeddingError::InputTooLong { limit: 10, actual: 11 }
        ));
    }

    #[tokio::test]
    async fn ollama_client_parses_embeddings() {
        let server = MockServer::start_async().await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text".into(), 3, 1000);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({
                    "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
                }));
            })
            .await;

        let vectors = client
            .embed(vec!["one".into(), "two".into()])
            .await
            .expect("vectors");
        mock.assert();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn server_errors_classify_as_transient() {
        let server = MockServer::start_async().await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text".into(), 3, 1000);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(503).body("overloaded");
            })
            .await;

        let error = client.embed(vec!["one".into()]).await.expect_err("error");
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn client_errors_classify_as_rejected() {
        let server = MockServer::start_async().await;
        let client = OpenAiEmbeddingClient::with_base_url(
            server.base_url(),
            "sk-test".into(),
            "text-embedding-3-small".into(),
            3,
            1000,
        );

        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/embeddings");
                then.status(400).body("invalid input");
            })
            .await;

        let error = client.embed(vec!["one".into()]).await.expect_err("error");
        assert!(matches!(error, EmbeddingError::ProviderRejected(_)));
        assert!(!error.is_transient());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_detected() {
        let server = MockServer::start_async().await;
        let client =
            OllamaEmbeddingClient::new(server.base_url(), "nomic-embed-text".into(), 4, 1000);

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1, 0.2]] }));
            })
            .await;

        let error = client.embed(vec!["one".into()]).await.expect_err("error");
        assert!(matches!(
            error,
            EmbeddingError::DimensionMismatch { expected: 4, actual: 2 }
        ));
    }
}
