#![deny(missing_docs)]

//! Core library for the docpilot document-to-answer pipeline.
//!
//! Uploads flow through extraction, chunking, embedding, and vector indexing
//! before becoming searchable; questions are answered by retrieving the most
//! relevant chunks and conditioning a generative model on them. The HTTP
//! surface, authentication, and persistent storage engines live outside this
//! crate and connect through the trait seams in [`store`], [`index`],
//! [`embedding`], and [`generation`].

/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and provider adapters.
pub mod embedding;
/// File-type detection and text extraction for uploaded documents.
pub mod extract;
/// Generative model clients, batch and streaming.
pub mod generation;
/// Vector index abstraction with Qdrant and in-memory backends.
pub mod index;
/// Document state machine, retention, and deletion orchestration.
pub mod lifecycle;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline activity counters.
pub mod metrics;
/// Document processing pipeline: chunking, summarization, retrieval, answering.
pub mod processing;
/// Bounded exponential backoff for transient provider failures.
pub mod retry;
/// Metadata and blob storage abstractions.
pub mod store;
