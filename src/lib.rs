//! ragmill is a retrieval-augmented knowledge backend: documents are
//! chunked, embedded, and stored in a local SQLite vector store by an async
//! task pipeline; queries are answered by a strategy engine that combines
//! knowledge-base retrieval with web search and fuses the evidence.
//!
//! The two entry points are [`tasks::IngestionTaskManager`] for the write
//! path and [`engine::KnowledgeEngine`] for the read path.

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod migrate;
pub mod models;
pub mod rerank;
pub mod retrieval;
pub mod strategy;
pub mod tasks;
pub mod vector_store;
pub mod websearch;

pub use engine::{ChatSearchResponse, KnowledgeEngine, SearchResponse};
pub use error::{Error, Result};
pub use models::{Provenance, SearchResult, TaskSnapshot, TaskStatus};
pub use retrieval::QueryOverrides;
pub use strategy::SearchStrategy;
pub use tasks::IngestionTaskManager;
