//! Metadata and blob storage abstractions.
//!
//! The pipeline treats its persistent stores as opaque collaborators: a
//! key-value metadata store for document and summary records, and a blob
//! store for raw uploads. The in-memory implementations back tests and
//! single-process deployments; production backends implement the same traits
//! outside this crate.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::extract::FileType;
use crate::lifecycle::DocumentStatus;

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The referenced record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),
    /// The backing service failed.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persisted state of one uploaded document.
///
/// Owned by the lifecycle manager; status only changes through its
/// transition checks.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Opaque document identifier chosen by the caller.
    pub id: String,
    /// Original filename as uploaded.
    pub filename: String,
    /// Detected file type.
    pub file_type: FileType,
    /// Size of the raw upload in bytes.
    pub byte_size: u64,
    /// Current processing status.
    pub status: DocumentStatus,
    /// Number of chunks currently indexed for the document.
    pub chunk_count: usize,
    /// Reference into the blob store for the raw upload.
    pub storage_ref: String,
    /// Failure diagnostic recorded when processing terminated in `Failed`.
    pub error_message: Option<String>,
    /// Instant at which the expiration sweep removes the document.
    pub expires_at: OffsetDateTime,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last mutation timestamp.
    pub updated_at: OffsetDateTime,
}

/// Structured summary derived from one document's full chunk set.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DocumentSummary {
    /// Document the summary belongs to.
    pub document_id: String,
    /// Prose summary text.
    pub summary: String,
    /// Ordered key points extracted from the document.
    pub key_points: Vec<String>,
    /// Summary paragraphs in reading order.
    pub paragraphs: Vec<String>,
    /// Personal or identifying information found in the document.
    pub personal_info: String,
    /// Word count of the prose summary.
    pub word_count: usize,
}

/// Metadata store for document and summary records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a record, replacing any prior record under the same id.
    ///
    /// A reused id after deletion starts a fresh lifecycle.
    async fn create(&self, record: DocumentRecord) -> Result<(), StoreError>;

    /// Replace an existing record.
    async fn update(&self, record: DocumentRecord) -> Result<(), StoreError>;

    /// Fetch a record by id.
    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError>;

    /// List records currently in the given status.
    async fn list_by_status(&self, status: DocumentStatus)
    -> Result<Vec<DocumentRecord>, StoreError>;

    /// List records whose `expires_at` is at or before the cutoff.
    async fn list_expired(&self, cutoff: OffsetDateTime)
    -> Result<Vec<DocumentRecord>, StoreError>;

    /// Remove a record and its summary. Idempotent.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Store a summary, replacing any prior one for the same document.
    async fn put_summary(&self, summary: DocumentSummary) -> Result<(), StoreError>;

    /// Fetch the summary for a document.
    async fn get_summary(&self, document_id: &str) -> Result<Option<DocumentSummary>, StoreError>;
}

/// Blob store for raw uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under the given reference.
    async fn put(&self, reference: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch bytes by reference.
    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Remove a blob. Idempotent.
    async fn delete(&self, reference: &str) -> Result<(), StoreError>;
}

/// In-memory [`DocumentStore`] implementation.
#[derive(Default)]
pub struct MemoryDocumentStore {
    records: RwLock<HashMap<String, DocumentRecord>>,
    summaries: RwLock<HashMap<String, DocumentSummary>>,
}

impl MemoryDocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, record: DocumentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().expect("store lock poisoned");
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, record: DocumentRecord) -> Result<(), StoreError> {
        let mut records = self.records.write().expect("store lock poisoned");
        if !records.contains_key(&record.id) {
            return Err(StoreError::NotFound(record.id));
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        let records = self.records.read().expect("store lock poisoned");
        Ok(records.get(id).cloned())
    }

    async fn list_by_status(
        &self,
        status: DocumentStatus,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let records = self.records.read().expect("store lock poisoned");
        let mut matched: Vec<DocumentRecord> = records
            .values()
            .filter(|record| record.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }

    async fn list_expired(
        &self,
        cutoff: OffsetDateTime,
    ) -> Result<Vec<DocumentRecord>, StoreError> {
        let records = self.records.read().expect("store lock poisoned");
        let mut matched: Vec<DocumentRecord> = records
            .values()
            .filter(|record| record.expires_at <= cutoff)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matched)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records
            .write()
            .expect("store lock poisoned")
            .remove(id);
        self.summaries
            .write()
            .expect("store lock poisoned")
            .remove(id);
        Ok(())
    }

    async fn put_summary(&self, summary: DocumentSummary) -> Result<(), StoreError> {
        let mut summaries = self.summaries.write().expect("store lock poisoned");
        summaries.insert(summary.document_id.clone(), summary);
        Ok(())
    }

    async fn get_summary(&self, document_id: &str) -> Result<Option<DocumentSummary>, StoreError> {
        let summaries = self.summaries.read().expect("store lock poisoned");
        Ok(summaries.get(document_id).cloned())
    }
}

/// In-memory [`BlobStore`] implementation.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, reference: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut blobs = self.blobs.write().expect("blob lock poisoned");
        blobs.insert(reference.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self.blobs.read().expect("blob lock poisoned");
        Ok(blobs.get(reference).cloned())
    }

    async fn delete(&self, reference: &str) -> Result<(), StoreError> {
        self.blobs
            .write()
            .expect("blob lock poisoned")
            .remove(reference);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn record(id: &str, status: DocumentStatus, expires_in: Duration) -> DocumentRecord {
        let now = OffsetDateTime::now_utc();
        DocumentRecord {
            id: id.to_string(),
            filename: format!("{id}.txt"),
            file_type: FileType::Plain,
            byte_size: 42,
            status,
            chunk_count: 0,
            storage_ref: format!("blob/{id}"),
            error_message: None,
            expires_at: now + expires_in,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemoryDocumentStore::new();
        store
            .create(record("doc-1", DocumentStatus::Pending, Duration::days(7)))
            .await
            .unwrap();

        let fetched = store.get("doc-1").await.unwrap().expect("record");
        assert_eq!(fetched.filename, "doc-1.txt");
        assert_eq!(fetched.status, DocumentStatus::Pending);
    }

    #[tokio::test]
    async fn update_requires_existing_record() {
        let store = MemoryDocumentStore::new();
        let error = store
            .update(record("ghost", DocumentStatus::Pending, Duration::days(7)))
            .await
            .unwrap_err();
        assert!(matches!(error, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_expired_filters_by_cutoff() {
        let store = MemoryDocumentStore::new();
        store
            .create(record("old", DocumentStatus::Ready, Duration::days(-1)))
            .await
            .unwrap();
        store
            .create(record("fresh", DocumentStatus::Ready, Duration::days(7)))
            .await
            .unwrap();

        let expired = store.list_expired(OffsetDateTime::now_utc()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "old");
    }

    #[tokio::test]
    async fn delete_removes_record_and_summary() {
        let store = MemoryDocumentStore::new();
        store
            .create(record("doc-1", DocumentStatus::Ready, Duration::days(7)))
            .await
            .unwrap();
        store
            .put_summary(DocumentSummary {
                document_id: "doc-1".into(),
                summary: "short".into(),
                key_points: vec![],
                paragraphs: vec![],
                personal_info: String::new(),
                word_count: 1,
            })
            .await
            .unwrap();

        store.delete("doc-1").await.unwrap();
        store.delete("doc-1").await.unwrap();
        assert!(store.get("doc-1").await.unwrap().is_none());
        assert!(store.get_summary("doc-1").await.unwrap().is_none());
    }
}
