//! Pipeline service coordinating extraction, chunking, embedding, indexing,
//! summarization, retrieval, and answering.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::Config,
    embedding::{EmbeddingClient, EmbeddingError, HashEmbeddingClient, build_embedding_client},
    extract::{self, FileType, OcrClient, OllamaOcrClient},
    generation::{GenerationClient, OllamaGenerationClient, TokenStream},
    index::{IndexError, MemoryIndex, PointInsert, QdrantIndex, VectorIndex, compute_chunk_hash},
    lifecycle::{DocumentStatus, LifecycleError, LifecycleManager},
    metrics::{MetricsSnapshot, PipelineMetrics},
    processing::{
        answer::{build_answer_prompt, grade_confidence, source_previews},
        chunking::chunk_text,
        summarize::Summarizer,
        types::{
            AnswerError, AnswerResponse, ChatTurn, Chunk, IngestError, RetrievalResult,
            SearchError, SummarizeError,
        },
    },
    retry::{RetryPolicy, with_backoff},
    store::{
        BlobStore, DocumentRecord, DocumentStore, DocumentSummary, MemoryBlobStore,
        MemoryDocumentStore, StoreError,
    },
};

/// Coordinates the full document-to-answer pipeline.
///
/// The handle is cheap to clone; every clone shares the same embedding and
/// generation clients, vector index, storage collaborators, and metrics.
/// Construct it once near process start; ingestion runs as background tasks
/// spawned from it.
#[derive(Clone)]
pub struct DocumentPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    config: Arc<Config>,
    embedding: Arc<dyn EmbeddingClient>,
    generation: Arc<dyn GenerationClient>,
    ocr: Arc<dyn OcrClient>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    lifecycle: Arc<LifecycleManager>,
    metrics: Arc<PipelineMetrics>,
}

impl DocumentPipeline {
    /// Build a production pipeline: Qdrant index, configured providers, and
    /// in-memory stores (swap the stores via [`DocumentPipeline::with_components`]
    /// when a persistent metadata service is wired in).
    pub async fn new(config: Config) -> Result<Self, IndexError> {
        let config = Arc::new(config);
        let index = QdrantIndex::new(&config)?;
        index.ensure_collection().await?;

        tracing::info!("Initializing pipeline components");
        let embedding = build_embedding_client(&config);
        let generation: Arc<dyn GenerationClient> = Arc::new(OllamaGenerationClient::new(
            config.ollama_url.clone(),
            config.generation_model.clone(),
        ));
        let ocr: Arc<dyn OcrClient> = Arc::new(OllamaOcrClient::new(
            config.ollama_url.clone(),
            config.ocr_model.clone(),
        ));

        Ok(Self::with_components(
            config,
            embedding,
            generation,
            ocr,
            Arc::new(index),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        ))
    }

    /// Build an offline pipeline with deterministic embeddings and an
    /// in-memory index; no external service is contacted except generation.
    pub fn offline(
        config: Config,
        generation: Arc<dyn GenerationClient>,
        ocr: Arc<dyn OcrClient>,
    ) -> Self {
        let dimension = config.embedding_dimension;
        Self::with_components(
            Arc::new(config),
            Arc::new(HashEmbeddingClient::new(dimension)),
            generation,
            ocr,
            Arc::new(MemoryIndex::new()),
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    /// Assemble a pipeline from explicit components.
    pub fn with_components(
        config: Arc<Config>,
        embedding: Arc<dyn EmbeddingClient>,
        generation: Arc<dyn GenerationClient>,
        ocr: Arc<dyn OcrClient>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            blobs.clone(),
            index.clone(),
            metrics.clone(),
            config.retention,
        ));
        Self {
            inner: Arc::new(PipelineInner {
                config,
                embedding,
                generation,
                ocr,
                index,
                store,
                blobs,
                lifecycle,
                metrics,
            }),
        }
    }

    /// Lifecycle manager owning document records and the expiration sweep.
    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.inner.lifecycle
    }

    /// Current pipeline activity counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Fetch a document record for status polling.
    pub async fn document(&self, document_id: &str) -> Result<Option<DocumentRecord>, StoreError> {
        self.inner.store.get(document_id).await
    }

    /// Fetch the stored summary for a document.
    pub async fn summary(&self, document_id: &str) -> Result<Option<DocumentSummary>, StoreError> {
        self.inner.store.get_summary(document_id).await
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.inner.config.retry_max_attempts,
            self.inner.config.retry_base_delay_ms,
        )
    }

    /// Accept an upload and start background ingestion.
    ///
    /// Stores the blob, registers a fresh `Pending` record (a reused id
    /// starts a new lifecycle), and spawns the processing task. The returned
    /// watch channel reports status transitions; the same status is persisted
    /// for polling through [`DocumentPipeline::document`].
    pub async fn ingest(
        &self,
        document_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        declared_type: Option<&str>,
    ) -> Result<watch::Receiver<DocumentStatus>, IngestError> {
        let limit = self.inner.config.max_file_bytes;
        let actual = bytes.len() as u64;
        if actual > limit {
            return Err(IngestError::FileTooLarge { limit, actual });
        }

        let file_type = FileType::detect(declared_type, filename, &bytes)?;
        let storage_ref = format!("uploads/{document_id}");
        self.inner.blobs.put(&storage_ref, bytes.clone()).await?;
        self.inner
            .lifecycle
            .register(document_id, filename, file_type, actual, &storage_ref)
            .await?;

        let (tx, rx) = watch::channel(DocumentStatus::Pending);
        let pipeline = self.clone();
        let id = document_id.to_string();
        tokio::spawn(async move {
            pipeline.run_ingest(&id, bytes, file_type, tx).await;
        });
        Ok(rx)
    }

    /// Background ingestion task body; records the terminal outcome.
    async fn run_ingest(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        file_type: FileType,
        tx: watch::Sender<DocumentStatus>,
    ) {
        if let Err(error) = self.inner.lifecycle.mark_processing(document_id).await {
            tracing::error!(document_id, error = %error, "Failed to enter processing");
            return;
        }
        let _ = tx.send(DocumentStatus::Processing);

        match self.process(document_id, bytes, file_type).await {
            Ok(chunk_count) => {
                match self.inner.lifecycle.mark_ready(document_id, chunk_count).await {
                    Ok(_) => {
                        self.inner.metrics.record_ingested(chunk_count as u64);
                        tracing::info!(document_id, chunk_count, "Document ready");
                        let _ = tx.send(DocumentStatus::Ready);
                    }
                    Err(error) => {
                        tracing::error!(document_id, error = %error, "Failed to mark document ready");
                        let _ = tx.send(DocumentStatus::Failed);
                    }
                }
            }
            Err(error) => {
                tracing::warn!(document_id, error = %error, "Ingestion failed");
                self.inner.metrics.record_failed();
                if let Err(update_error) = self
                    .inner
                    .lifecycle
                    .mark_failed(document_id, &error.to_string())
                    .await
                {
                    tracing::error!(document_id, error = %update_error, "Failed to record failure");
                }
                let _ = tx.send(DocumentStatus::Failed);
            }
        }
    }

    /// Extract, chunk, then embed+index and summarize concurrently.
    async fn process(
        &self,
        document_id: &str,
        bytes: Vec<u8>,
        file_type: FileType,
    ) -> Result<usize, IngestError> {
        let text = extract::extract_text(&bytes, file_type, self.inner.ocr.as_ref()).await?;
        let chunks = chunk_text(
            document_id,
            &text,
            self.inner.config.chunk_size,
            self.inner.config.chunk_overlap,
        )?;
        tracing::debug!(
            document_id,
            chunks = chunks.len(),
            chars = text.chars().count(),
            "Document chunked"
        );

        // Both stages depend only on the chunk set, not on each other.
        let summarizer = self.summarizer();
        let (indexed, summary) = tokio::join!(
            self.embed_and_index(document_id, &chunks),
            summarizer.summarize(document_id, &chunks),
        );
        let chunk_count = indexed?;
        let summary = summary?;
        self.inner.store.put_summary(summary).await?;
        Ok(chunk_count)
    }

    fn summarizer(&self) -> Summarizer {
        Summarizer::new(
            self.inner.generation.clone(),
            self.inner.config.generation_context_tokens,
            self.inner.config.summary_max_words,
            self.retry_policy(),
        )
    }

    /// Embed all chunks in provider-sized batches and upsert them as one
    /// atomic set, so a concurrent search never observes a partial document.
    async fn embed_and_index(
        &self,
        document_id: &str,
        chunks: &[Chunk],
    ) -> Result<usize, IngestError> {
        let policy = self.retry_policy();
        let batch_size = self.inner.config.embedding_batch_size.max(1);
        let dimension = self.inner.config.embedding_dimension;
        let mut points = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = with_backoff("embed", policy, || {
                self.inner.embedding.embed(texts.clone())
            })
            .await?;
            if vectors.len() != batch.len() {
                return Err(EmbeddingError::MissingVectors {
                    expected: batch.len(),
                    actual: vectors.len(),
                }
                .into());
            }
            for (chunk, vector) in batch.iter().zip(vectors) {
                if vector.len() != dimension {
                    return Err(EmbeddingError::DimensionMismatch {
                        expected: dimension,
                        actual: vector.len(),
                    }
                    .into());
                }
                points.push(PointInsert {
                    chunk_index: chunk.index,
                    start_offset: chunk.start,
                    end_offset: chunk.end,
                    chunk_hash: compute_chunk_hash(&chunk.text),
                    text: chunk.text.clone(),
                    vector,
                });
            }
        }

        let count = self.inner.index.upsert(document_id, points).await?;
        Ok(count)
    }

    /// Retrieve the top-k chunks of a ready document for a query.
    ///
    /// The status gate runs before any embedding or index call, so a query
    /// against a document still processing fails fast with
    /// [`SearchError::DocumentNotReady`].
    pub async fn search(
        &self,
        document_id: &str,
        query: &str,
        k: Option<usize>,
    ) -> Result<RetrievalResult, SearchError> {
        let record = self
            .inner
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| SearchError::NotFound(document_id.to_string()))?;
        if record.status != DocumentStatus::Ready {
            return Err(SearchError::DocumentNotReady {
                status: record.status,
            });
        }
        if record.chunk_count == 0 {
            return Err(SearchError::EmptyIndex);
        }

        let policy = self.retry_policy();
        let vector = with_backoff("embed-query", policy, || {
            self.inner.embedding.embed_query(query.to_string())
        })
        .await?;

        let k = k.unwrap_or(self.inner.config.retrieval_top_k).max(1);
        let hits = self.inner.index.search(document_id, &vector, k).await?;
        if hits.is_empty() {
            return Err(SearchError::EmptyIndex);
        }

        self.inner.metrics.record_query();
        Ok(RetrievalResult {
            document_id: document_id.to_string(),
            query: query.to_string(),
            hits,
        })
    }

    /// Answer a question in one batch response.
    pub async fn answer(
        &self,
        document_id: &str,
        question: &str,
        history: &[ChatTurn],
        k: Option<usize>,
    ) -> Result<AnswerResponse, AnswerError> {
        let retrieval = self.search(document_id, question, k).await?;
        let prompt = build_answer_prompt(question, &retrieval.hits, history);

        let policy = self.retry_policy();
        let answer = with_backoff("answer", policy, || {
            self.inner.generation.generate(&prompt)
        })
        .await?;

        Ok(AnswerResponse {
            answer,
            confidence: grade_confidence(retrieval.hits.first().map(|hit| hit.score)),
            sources: source_previews(&retrieval.hits),
        })
    }

    /// Answer a question as an incremental fragment stream.
    ///
    /// Dropping the returned stream cancels the underlying generation call.
    pub async fn answer_stream(
        &self,
        document_id: &str,
        question: &str,
        history: &[ChatTurn],
        k: Option<usize>,
    ) -> Result<TokenStream, AnswerError> {
        let retrieval = self.search(document_id, question, k).await?;
        let prompt = build_answer_prompt(question, &retrieval.hits, history);
        let stream = self.inner.generation.generate_stream(&prompt).await?;
        Ok(stream)
    }

    /// Regenerate the document's summary from its indexed chunk set,
    /// replacing the stored summary wholesale.
    pub async fn summarize(&self, document_id: &str) -> Result<DocumentSummary, SummarizeError> {
        let record = self
            .inner
            .store
            .get(document_id)
            .await?
            .ok_or_else(|| SummarizeError::NotFound(document_id.to_string()))?;
        if record.status != DocumentStatus::Ready {
            return Err(SummarizeError::DocumentNotReady {
                status: record.status,
            });
        }

        let stored = self.inner.index.fetch(document_id).await?;
        if stored.is_empty() {
            return Err(SummarizeError::EmptyDocument);
        }
        let chunks: Vec<Chunk> = stored
            .into_iter()
            .map(|chunk| Chunk {
                document_id: document_id.to_string(),
                index: chunk.chunk_index,
                start: chunk.start_offset,
                end: chunk.end_offset,
                text: chunk.text,
            })
            .collect();

        let summary = self.summarizer().summarize(document_id, &chunks).await?;
        self.inner.store.put_summary(summary.clone()).await?;
        Ok(summary)
    }

    /// Delete a document's vectors, blob, and record. Idempotent.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool, LifecycleError> {
        self.inner.lifecycle.delete_document(document_id).await
    }

    /// Remove every expired document; returns how many were removed.
    pub async fn expire_sweep(&self) -> Result<usize, LifecycleError> {
        self.inner.lifecycle.expire_sweep().await
    }

    /// Start the periodic expiration sweeper for this pipeline.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.inner
            .lifecycle
            .clone()
            .spawn_sweeper(self.inner.config.sweep_interval_secs)
    }
}
