//! Vector index abstraction with Qdrant and in-memory backends.
//!
//! Vectors are partitioned by document: every operation is scoped to one
//! `document_id`, and a search against one document can never return another
//! document's chunks. Rankings are deterministic: descending score with ties
//! broken by ascending chunk index.

pub mod memory;
pub mod payload;
pub mod qdrant;
pub mod types;

use async_trait::async_trait;

pub use memory::MemoryIndex;
pub use payload::compute_chunk_hash;
pub use qdrant::QdrantIndex;
pub use types::{IndexError, PointInsert, ScoredChunk, StoredChunk};

/// Interface implemented by vector index backends.
///
/// `upsert` replaces a document's full vector set; partial sets are never
/// visible to concurrent searches. `delete` is idempotent; removing an
/// absent document is not an error.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace the document's vector set with the supplied points.
    async fn upsert(&self, document_id: &str, points: Vec<PointInsert>)
    -> Result<usize, IndexError>;

    /// Return up to `k` chunks of the document ranked by similarity to `query`.
    async fn search(
        &self,
        document_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError>;

    /// Return every chunk stored for the document, ordered by chunk index.
    async fn fetch(&self, document_id: &str) -> Result<Vec<StoredChunk>, IndexError>;

    /// Number of vectors currently indexed for the document.
    async fn count(&self, document_id: &str) -> Result<usize, IndexError>;

    /// Remove the document's vectors. Idempotent.
    async fn delete(&self, document_id: &str) -> Result<(), IndexError>;
}
