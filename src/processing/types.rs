//! Core data types and error definitions for the processing pipeline.

use thiserror::Error;

use crate::embedding::EmbeddingError;
use crate::extract::ExtractError;
use crate::generation::GenerationError;
use crate::index::{IndexError, ScoredChunk};
use crate::lifecycle::{DocumentStatus, LifecycleError};
use crate::store::StoreError;

/// A contiguous slice of a document's normalized text.
///
/// Offsets are character positions into the normalized text; consecutive
/// chunks overlap by at most the configured overlap. Chunks are immutable
/// once created; reprocessing replaces a document's full set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Document the chunk belongs to.
    pub document_id: String,
    /// Position of the chunk within the document.
    pub index: usize,
    /// Start of the chunk's character range in the normalized text.
    pub start: usize,
    /// End (exclusive) of the chunk's character range.
    pub end: usize,
    /// Text content covered by the range.
    pub text: String,
}

/// Errors produced while splitting normalized text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size of zero can never cover any text.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Overlap must stay strictly below the chunk size to make progress.
    #[error("chunk overlap {chunk_overlap} must be smaller than chunk size {chunk_size}")]
    OverlapTooLarge {
        /// Configured chunk size.
        chunk_size: usize,
        /// Configured overlap.
        chunk_overlap: usize,
    },
    /// Normalized text was empty or whitespace-only.
    #[error("document text is empty")]
    EmptyInput,
}

/// Ranked retrieval output for one query, transient per request.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    /// Document the search was scoped to.
    pub document_id: String,
    /// Original query text.
    pub query: String,
    /// Chunks ordered by descending similarity, ties by ascending index.
    pub hits: Vec<ScoredChunk>,
}

/// One prior exchange supplied by the caller for conversational context.
///
/// History is never persisted by the pipeline; each request carries whatever
/// context its caller chooses to thread through.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatTurn {
    /// Speaker role, `user` or `assistant`.
    pub role: String,
    /// Message content.
    pub content: String,
}

/// Confidence grade derived from the top retrieval score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// Top hit scored above 0.6.
    High,
    /// Top hit scored above 0.4.
    Medium,
    /// Weak or missing retrieval support.
    Low,
}

/// Truncated view of a retrieved chunk returned alongside an answer.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SourcePreview {
    /// Position of the source chunk within its document.
    pub chunk_index: usize,
    /// Chunk text truncated for display.
    pub content: String,
    /// Similarity score of the chunk for the query.
    pub relevance_score: f32,
}

/// Complete answer produced in non-streaming mode.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AnswerResponse {
    /// Generated answer text.
    pub answer: String,
    /// Previews of the retrieved chunks the answer was grounded in.
    pub sources: Vec<SourcePreview>,
    /// Confidence grade for the retrieval support.
    pub confidence: Confidence,
}

/// Errors terminating a document's ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Upload exceeded the configured size limit.
    #[error("file of {actual} bytes exceeds limit of {limit}")]
    FileTooLarge {
        /// Configured maximum upload size.
        limit: u64,
        /// Observed upload size.
        actual: u64,
    },
    /// Text extraction failed.
    #[error("extraction failed: {0}")]
    Extract(#[from] ExtractError),
    /// Chunking failed.
    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed after retries.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Vector index write failed.
    #[error("indexing failed: {0}")]
    Index(#[from] IndexError),
    /// Summarization failed.
    #[error("summarization failed: {0}")]
    Summarize(#[from] SummarizeError),
    /// Lifecycle bookkeeping failed.
    #[error("lifecycle update failed: {0}")]
    Lifecycle(#[from] LifecycleError),
    /// Metadata or blob store failed.
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised by query-time retrieval.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The document is not in a searchable state.
    #[error("document is {status}, not ready for queries")]
    DocumentNotReady {
        /// Status the document is currently in.
        status: DocumentStatus,
    },
    /// The document has zero indexed chunks.
    #[error("document has no indexed chunks")]
    EmptyIndex,
    /// Query embedding failed.
    #[error("query embedding failed: {0}")]
    Embedding(#[from] EmbeddingError),
    /// Index search failed.
    #[error("index search failed: {0}")]
    Index(#[from] IndexError),
    /// Metadata store failed.
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while producing or storing a document summary.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The document does not exist.
    #[error("document not found: {0}")]
    NotFound(String),
    /// The document is not in a summarizable state.
    #[error("document is {status}, not ready for summarization")]
    DocumentNotReady {
        /// Status the document is currently in.
        status: DocumentStatus,
    },
    /// The document has no chunk content to summarize.
    #[error("document has no content to summarize")]
    EmptyDocument,
    /// Generation provider failed after retries.
    #[error("summary generation failed: {0}")]
    Generation(#[from] GenerationError),
    /// Fetching the chunk set from the index failed.
    #[error("chunk fetch failed: {0}")]
    Index(#[from] IndexError),
    /// Metadata store failed.
    #[error("storage failed: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while answering a question.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// Retrieval failed or the document was not queryable.
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Generation provider failed after retries.
    #[error("answer generation failed: {0}")]
    Generation(#[from] GenerationError),
}
