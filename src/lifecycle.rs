//! Document state machine, retention, and deletion orchestration.
//!
//! Every document moves `pending → processing → ready | failed`; terminal
//! states never regress to `processing` without an explicit reprocess
//! request. Deletion clears the vector index before the blob and metadata
//! record, and a partially deleted document is queued for reconciliation
//! rather than silently leaked.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::extract::FileType;
use crate::index::{IndexError, VectorIndex};
use crate::metrics::PipelineMetrics;
use crate::store::{BlobStore, DocumentRecord, DocumentStore, StoreError};

/// Processing status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Uploaded, waiting for the ingestion task to start.
    Pending,
    /// Extraction, chunking, embedding, or summarization in flight.
    Processing,
    /// Fully indexed and summarized; searchable.
    Ready,
    /// Processing terminated with a recorded error.
    Failed,
}

impl DocumentStatus {
    /// Whether this status ends the ingestion flow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Whether the state machine permits moving to `next`.
    ///
    /// Terminal states only move forward through [`LifecycleManager::begin_reprocess`].
    pub fn can_transition(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Processing)
                | (Self::Processing, Self::Ready)
                | (Self::Processing, Self::Failed)
        )
    }

    /// Stable lowercase name used in records and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while managing document lifecycles.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The document does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),
    /// The requested status change is not a legal transition.
    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the document is currently in.
        from: DocumentStatus,
        /// Status that was requested.
        to: DocumentStatus,
    },
    /// Metadata store failure.
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),
    /// Vector index failure.
    #[error("Index operation failed: {0}")]
    Index(#[from] IndexError),
}

/// Owns document records and enforces retention and deletion ordering.
pub struct LifecycleManager {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn VectorIndex>,
    metrics: Arc<PipelineMetrics>,
    retention: Duration,
    pending_reconciliation: Mutex<BTreeSet<String>>,
}

impl LifecycleManager {
    /// Build a manager over the given collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn VectorIndex>,
        metrics: Arc<PipelineMetrics>,
        retention: Duration,
    ) -> Self {
        Self {
            store,
            blobs,
            index,
            metrics,
            retention,
            pending_reconciliation: Mutex::new(BTreeSet::new()),
        }
    }

    /// Create and persist a fresh `Pending` record for an upload.
    ///
    /// `expires_at` is fixed at `created_at + retention` and is never
    /// extended by later reads.
    pub async fn register(
        &self,
        id: &str,
        filename: &str,
        file_type: FileType,
        byte_size: u64,
        storage_ref: &str,
    ) -> Result<DocumentRecord, LifecycleError> {
        let now = OffsetDateTime::now_utc();
        let record = DocumentRecord {
            id: id.to_string(),
            filename: filename.to_string(),
            file_type,
            byte_size,
            status: DocumentStatus::Pending,
            chunk_count: 0,
            storage_ref: storage_ref.to_string(),
            error_message: None,
            expires_at: now + self.retention,
            created_at: now,
            updated_at: now,
        };
        self.store.create(record.clone()).await?;
        tracing::info!(document_id = id, file_type = %file_type, byte_size, "Document registered");
        Ok(record)
    }

    async fn transition(
        &self,
        id: &str,
        next: DocumentStatus,
        apply: impl FnOnce(&mut DocumentRecord),
    ) -> Result<DocumentRecord, LifecycleError> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if !record.status.can_transition(next) {
            return Err(LifecycleError::InvalidTransition {
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        record.updated_at = OffsetDateTime::now_utc();
        apply(&mut record);
        self.store.update(record.clone()).await?;
        tracing::debug!(document_id = id, status = %next, "Status transition");
        Ok(record)
    }

    /// Move a pending document into `Processing`.
    pub async fn mark_processing(&self, id: &str) -> Result<DocumentRecord, LifecycleError> {
        self.transition(id, DocumentStatus::Processing, |_| {}).await
    }

    /// Complete processing: record the chunk count and move to `Ready`.
    pub async fn mark_ready(
        &self,
        id: &str,
        chunk_count: usize,
    ) -> Result<DocumentRecord, LifecycleError> {
        self.transition(id, DocumentStatus::Ready, |record| {
            record.chunk_count = chunk_count;
            record.error_message = None;
        })
        .await
    }

    /// Record a terminal failure with its diagnostic message.
    pub async fn mark_failed(
        &self,
        id: &str,
        message: &str,
    ) -> Result<DocumentRecord, LifecycleError> {
        self.transition(id, DocumentStatus::Failed, |record| {
            record.error_message = Some(message.to_string());
        })
        .await
    }

    /// Explicitly restart processing for a document in a terminal state.
    ///
    /// This is the only path by which `Ready` or `Failed` may return to
    /// `Processing`.
    pub async fn begin_reprocess(&self, id: &str) -> Result<DocumentRecord, LifecycleError> {
        let mut record = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;

        if !record.status.is_terminal() && record.status != DocumentStatus::Pending {
            return Err(LifecycleError::InvalidTransition {
                from: record.status,
                to: DocumentStatus::Processing,
            });
        }

        record.status = DocumentStatus::Processing;
        record.error_message = None;
        record.updated_at = OffsetDateTime::now_utc();
        self.store.update(record.clone()).await?;
        tracing::info!(document_id = id, "Reprocess requested");
        Ok(record)
    }

    /// Delete a document's vectors, blob, and record, in that order.
    ///
    /// Returns whether a record existed. Idempotent: deleting an absent
    /// document succeeds. A failure partway through queues the id for
    /// reconciliation on the next sweep instead of leaking the remainder.
    pub async fn delete_document(&self, id: &str) -> Result<bool, LifecycleError> {
        let record = self.store.get(id).await?;

        if let Err(error) = self.index.delete(id).await {
            tracing::error!(document_id = id, error = %error, "Index deletion failed; queued for reconciliation");
            self.queue_reconciliation(id);
            return Err(error.into());
        }

        let Some(record) = record else {
            return Ok(false);
        };

        if let Err(error) = self.blobs.delete(&record.storage_ref).await {
            tracing::error!(document_id = id, error = %error, "Blob deletion failed; queued for reconciliation");
            self.queue_reconciliation(id);
            return Err(error.into());
        }

        if let Err(error) = self.store.delete(id).await {
            tracing::error!(document_id = id, error = %error, "Record deletion failed; queued for reconciliation");
            self.queue_reconciliation(id);
            return Err(error.into());
        }

        tracing::info!(document_id = id, "Document deleted");
        Ok(true)
    }

    fn queue_reconciliation(&self, id: &str) {
        self.pending_reconciliation
            .lock()
            .expect("reconciliation lock poisoned")
            .insert(id.to_string());
    }

    /// Ids currently awaiting reconciliation.
    pub fn reconciliation_backlog(&self) -> Vec<String> {
        self.pending_reconciliation
            .lock()
            .expect("reconciliation lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    /// Remove every document whose `expires_at` has passed.
    ///
    /// Retries queued partial deletions first, then sweeps expired records.
    /// Returns the number of expired documents removed. Runs on a fixed
    /// interval via [`LifecycleManager::spawn_sweeper`], independent of
    /// request traffic; concurrent deletion of the same id is tolerated
    /// because deletes are idempotent.
    pub async fn expire_sweep(&self) -> Result<usize, LifecycleError> {
        let backlog: Vec<String> = {
            let mut pending = self
                .pending_reconciliation
                .lock()
                .expect("reconciliation lock poisoned");
            let drained = pending.iter().cloned().collect();
            pending.clear();
            drained
        };
        for id in backlog {
            if let Err(error) = self.delete_document(&id).await {
                tracing::warn!(document_id = %id, error = %error, "Reconciliation retry failed");
            }
        }

        let now = OffsetDateTime::now_utc();
        let expired = self.store.list_expired(now).await?;
        let mut removed = 0usize;
        for record in expired {
            match self.delete_document(&record.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(document_id = %record.id, error = %error, "Expiration delete failed");
                }
            }
        }

        if removed > 0 {
            self.metrics.record_expired(removed as u64);
            tracing::info!(removed, "Expiration sweep complete");
        }
        Ok(removed)
    }

    /// Run [`LifecycleManager::expire_sweep`] on a fixed interval until aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval_secs: u64) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(error) = self.expire_sweep().await {
                    tracing::warn!(error = %error, "Expiration sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, PointInsert};
    use crate::store::{MemoryBlobStore, MemoryDocumentStore};

    fn manager_with(retention: Duration) -> (Arc<LifecycleManager>, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(MemoryIndex::new()),
            Arc::new(PipelineMetrics::new()),
            retention,
        ));
        (manager, store)
    }

    #[test]
    fn transition_table_matches_state_machine() {
        use DocumentStatus::*;
        assert!(Pending.can_transition(Processing));
        assert!(Processing.can_transition(Ready));
        assert!(Processing.can_transition(Failed));
        assert!(!Ready.can_transition(Processing));
        assert!(!Failed.can_transition(Processing));
        assert!(!Pending.can_transition(Ready));
    }

    #[tokio::test]
    async fn expires_at_is_created_at_plus_retention() {
        let (manager, _) = manager_with(Duration::days(7));
        let record = manager
            .register("doc-1", "doc.txt", FileType::Plain, 10, "blob/doc-1")
            .await
            .unwrap();
        assert_eq!(record.expires_at, record.created_at + Duration::days(7));
    }

    #[tokio::test]
    async fn terminal_states_do_not_regress_without_reprocess() {
        let (manager, _) = manager_with(Duration::days(7));
        manager
            .register("doc-1", "doc.txt", FileType::Plain, 10, "blob/doc-1")
            .await
            .unwrap();
        manager.mark_processing("doc-1").await.unwrap();
        manager.mark_ready("doc-1", 3).await.unwrap();

        let error = manager.mark_processing("doc-1").await.unwrap_err();
        assert!(matches!(error, LifecycleError::InvalidTransition { .. }));

        let record = manager.begin_reprocess("doc-1").await.unwrap();
        assert_eq!(record.status, DocumentStatus::Processing);
    }

    #[tokio::test]
    async fn mark_failed_records_the_message() {
        let (manager, store) = manager_with(Duration::days(7));
        manager
            .register("doc-1", "doc.txt", FileType::Plain, 10, "blob/doc-1")
            .await
            .unwrap();
        manager.mark_processing("doc-1").await.unwrap();
        manager.mark_failed("doc-1", "corrupt pdf").await.unwrap();

        let record = store.get("doc-1").await.unwrap().unwrap();
        assert_eq!(record.status, DocumentStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("corrupt pdf"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (manager, _) = manager_with(Duration::days(7));
        manager
            .register("doc-1", "doc.txt", FileType::Plain, 10, "blob/doc-1")
            .await
            .unwrap();

        assert!(manager.delete_document("doc-1").await.unwrap());
        assert!(!manager.delete_document("doc-1").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_documents() {
        let store = Arc::new(MemoryDocumentStore::new());
        let index = Arc::new(MemoryIndex::new());
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            index.clone(),
            Arc::new(PipelineMetrics::new()),
            Duration::days(7),
        ));

        manager
            .register("fresh", "fresh.txt", FileType::Plain, 10, "blob/fresh")
            .await
            .unwrap();

        // Backdate one record past its expiry.
        let mut record = manager
            .register("stale", "stale.txt", FileType::Plain, 10, "blob/stale")
            .await
            .unwrap();
        record.expires_at = OffsetDateTime::now_utc() - Duration::minutes(1);
        store.create(record).await.unwrap();
        index
            .upsert(
                "stale",
                vec![PointInsert {
                    chunk_index: 0,
                    start_offset: 0,
                    end_offset: 4,
                    text: "text".into(),
                    chunk_hash: "h".into(),
                    vector: vec![1.0, 0.0],
                }],
            )
            .await
            .unwrap();

        let removed = manager.expire_sweep().await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("stale").await.unwrap().is_none());
        assert_eq!(index.count("stale").await.unwrap(), 0);
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
