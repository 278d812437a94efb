//! Document processing pipeline: chunking, summarization, retrieval, answering.

mod answer;
pub mod chunking;
mod service;
pub mod summarize;
pub mod types;

pub use service::DocumentPipeline;
pub use summarize::Summarizer;
pub use types::{
    AnswerError, AnswerResponse, ChatTurn, Chunk, ChunkingError, Confidence, IngestError,
    RetrievalResult, SearchError, SourcePreview, SummarizeError,
};
