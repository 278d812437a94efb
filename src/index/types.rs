//! Shared types used by the vector index backends.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while interacting with a vector index backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid index URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend responded with an unexpected status code.
    #[error("Unexpected index response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// A stored payload was missing required fields.
    #[error("Malformed index payload: {0}")]
    MalformedPayload(String),
}

/// Prepared chunk vector ready for indexing.
#[derive(Debug, Clone)]
pub struct PointInsert {
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Start of the chunk's character range in the normalized text.
    pub start_offset: usize,
    /// End (exclusive) of the chunk's character range.
    pub end_offset: usize,
    /// Raw chunk text.
    pub text: String,
    /// Deterministic hash of the chunk text.
    pub chunk_hash: String,
    /// Embedding vector produced for the chunk.
    pub vector: Vec<f32>,
}

/// Chunk returned from a similarity search, with its score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Raw chunk text.
    pub text: String,
    /// Similarity score; higher ranks first.
    pub score: f32,
    /// Start of the chunk's character range in the normalized text.
    pub start_offset: usize,
    /// End (exclusive) of the chunk's character range.
    pub end_offset: usize,
}

/// Chunk fetched back from the index without a score, ordered by index.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    /// Position of the chunk within its document.
    pub chunk_index: usize,
    /// Raw chunk text.
    pub text: String,
    /// Start of the chunk's character range in the normalized text.
    pub start_offset: usize,
    /// End (exclusive) of the chunk's character range.
    pub end_offset: usize,
}

/// Order hits by descending score, breaking ties by ascending chunk index.
///
/// Applied by every backend so rankings are deterministic regardless of how
/// the underlying engine orders equal scores.
pub fn rank_hits(hits: &mut [ScoredChunk]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    pub(crate) result: QueryResponseResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum QueryResponseResult {
    Points(Vec<QueryPoint>),
    Object {
        #[serde(default)]
        points: Vec<QueryPoint>,
    },
}

#[derive(Deserialize)]
pub(crate) struct QueryPoint {
    pub(crate) score: f32,
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
pub(crate) struct CountResponse {
    pub(crate) result: CountResult,
}

#[derive(Deserialize)]
pub(crate) struct CountResult {
    pub(crate) count: usize,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Deserialize)]
pub(crate) struct ScrollResult {
    #[serde(default)]
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Deserialize)]
pub(crate) struct ScrollPoint {
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}
