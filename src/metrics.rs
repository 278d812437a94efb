use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    documents_ingested: AtomicU64,
    documents_failed: AtomicU64,
    documents_expired: AtomicU64,
    chunks_indexed: AtomicU64,
    queries_answered: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a document that reached the ready state and its chunk count.
    pub fn record_ingested(&self, chunk_count: u64) {
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunk_count, Ordering::Relaxed);
    }

    /// Record a document whose processing terminated in failure.
    pub fn record_failed(&self) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record documents removed by the expiration sweep or explicit deletion.
    pub fn record_expired(&self, count: u64) {
        self.documents_expired.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a served retrieval or answer request.
    pub fn record_query(&self) {
        self.queries_answered.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            documents_expired: self.documents_expired.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents that completed ingestion since startup.
    pub documents_ingested: u64,
    /// Number of documents whose ingestion terminated in failure.
    pub documents_failed: u64,
    /// Number of documents removed by sweeps or explicit deletes.
    pub documents_expired: u64,
    /// Total chunk count indexed across all documents.
    pub chunks_indexed: u64,
    /// Number of retrieval and answer requests served.
    pub queries_answered: u64,
}
