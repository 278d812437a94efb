//! In-memory vector index for tests and offline operation.
//!
//! Brute-force cosine similarity over per-document point sets behind a
//! `std::sync::RwLock`. Each document's set is replaced in one write-lock
//! critical section, so readers never observe a partially replaced partition.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::VectorIndex;
use super::types::{IndexError, PointInsert, ScoredChunk, StoredChunk, rank_hits};

/// In-memory [`VectorIndex`] implementation.
#[derive(Default)]
pub struct MemoryIndex {
    partitions: RwLock<HashMap<String, Vec<PointInsert>>>,
}

impl MemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, document_id: &str, points: Vec<PointInsert>) -> Result<usize, IndexError> {
        let count = points.len();
        let mut partitions = self.partitions.write().expect("index lock poisoned");
        partitions.insert(document_id.to_string(), points);
        Ok(count)
    }

    async fn search(
        &self,
        document_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        let partitions = self.partitions.read().expect("index lock poisoned");
        let mut hits: Vec<ScoredChunk> = partitions
            .get(document_id)
            .map(|points| {
                points
                    .iter()
                    .map(|point| ScoredChunk {
                        chunk_index: point.chunk_index,
                        text: point.text.clone(),
                        score: cosine_sim(query, &point.vector),
                        start_offset: point.start_offset,
                        end_offset: point.end_offset,
                    })
                    .collect()
            })
            .unwrap_or_default();

        rank_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn fetch(&self, document_id: &str) -> Result<Vec<StoredChunk>, IndexError> {
        let partitions = self.partitions.read().expect("index lock poisoned");
        let mut chunks: Vec<StoredChunk> = partitions
            .get(document_id)
            .map(|points| {
                points
                    .iter()
                    .map(|point| StoredChunk {
                        chunk_index: point.chunk_index,
                        text: point.text.clone(),
                        start_offset: point.start_offset,
                        end_offset: point.end_offset,
                    })
                    .collect()
            })
            .unwrap_or_default();
        chunks.sort_by_key(|chunk| chunk.chunk_index);
        Ok(chunks)
    }

    async fn count(&self, document_id: &str) -> Result<usize, IndexError> {
        let partitions = self.partitions.read().expect("index lock poisoned");
        Ok(partitions.get(document_id).map_or(0, Vec::len))
    }

    async fn delete(&self, document_id: &str) -> Result<(), IndexError> {
        let mut partitions = self.partitions.write().expect("index lock poisoned");
        partitions.remove(document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::payload::compute_chunk_hash;

    fn point(index: usize, text: &str, vector: Vec<f32>) -> PointInsert {
        PointInsert {
            chunk_index: index,
            start_offset: index * 10,
            end_offset: index * 10 + text.len(),
            text: text.to_string(),
            chunk_hash: compute_chunk_hash(text),
            vector,
        }
    }

    #[tokio::test]
    async fn search_never_crosses_documents() {
        let index = MemoryIndex::new();
        index
            .upsert("doc-a", vec![point(0, "shared vocabulary text", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert("doc-b", vec![point(0, "shared vocabulary text", vec![1.0, 0.0])])
            .await
            .unwrap();

        let hits = index.search("doc-a", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits_b = index.search("doc-b", &[1.0, 0.0], 10).await.unwrap();
        assert_eq!(hits_b.len(), 1);
    }

    #[tokio::test]
    async fn identical_vector_scores_maximum_and_ranks_first() {
        let index = MemoryIndex::new();
        index
            .upsert(
                "doc-a",
                vec![
                    point(0, "off-topic", vec![0.0, 1.0]),
                    point(1, "exact match", vec![0.6, 0.8]),
                ],
            )
            .await
            .unwrap();

        let hits = index.search("doc-a", &[0.6, 0.8], 2).await.unwrap();
        assert_eq!(hits[0].chunk_index, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn equal_scores_break_ties_by_chunk_index() {
        let index = MemoryIndex::new();
        index
            .upsert(
                "doc-a",
                vec![
                    point(2, "same", vec![1.0, 0.0]),
                    point(0, "same", vec![1.0, 0.0]),
                    point(1, "same", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = index.search("doc-a", &[1.0, 0.0], 3).await.unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn upsert_replaces_the_whole_partition() {
        let index = MemoryIndex::new();
        index
            .upsert("doc-a", vec![point(0, "old", vec![1.0, 0.0]), point(1, "old", vec![1.0, 0.0])])
            .await
            .unwrap();
        index
            .upsert("doc-a", vec![point(0, "new", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(index.count("doc-a").await.unwrap(), 1);
        let chunks = index.fetch("doc-a").await.unwrap();
        assert_eq!(chunks[0].text, "new");
    }

    #[tokio::test]
    async fn delete_twice_matches_delete_once() {
        let index = MemoryIndex::new();
        index
            .upsert("doc-a", vec![point(0, "text", vec![1.0, 0.0])])
            .await
            .unwrap();

        index.delete("doc-a").await.unwrap();
        index.delete("doc-a").await.unwrap();
        assert_eq!(index.count("doc-a").await.unwrap(), 0);
        assert!(index.search("doc-a", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }
}
