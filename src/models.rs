//! Core data types that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an ingestion task.
///
/// Transitions are one-directional: `Pending -> Processing -> Completed`
/// or `Pending -> Processing -> Failed`. Both `Completed` and `Failed` are
/// terminal; soft-deleting a document flips the task's `active` flag but
/// never its status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "completed" => Some(TaskStatus::Completed),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One ingestion task per document (or pasted-text) submission.
#[derive(Debug, Clone)]
pub struct IngestionTask {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub content_type: String,
    pub user_id: String,
    pub group_id: Option<i64>,
    /// Filesystem path for file submissions; empty for pasted text.
    pub source_path: String,
    /// Inline content for pasted-text submissions.
    pub content: Option<String>,
    pub status: TaskStatus,
    /// 0..=100, non-decreasing while `Processing`, 100 iff `Completed`.
    pub progress: i64,
    pub total_chunks: i64,
    pub processed_chunks: i64,
    pub error_message: Option<String>,
    /// Tombstone: inactive tasks are excluded from listings; their vectors
    /// are purged by the cascade delete.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of a task returned to status pollers.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress: i64,
    pub error_message: Option<String>,
}

/// A named, tenant-scoped collection partitioning the vector space.
#[derive(Debug, Clone)]
pub struct KnowledgeGroup {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub user_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One vector record per text chunk, owned by the vector store.
///
/// The record id is derived from `(document_id, chunk_index)` so that
/// re-ingesting the same document overwrites rather than duplicates.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub chunk_content: String,
    pub embedding: Vec<f32>,
    pub source_path: String,
    pub content_type: String,
    pub user_id: String,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Deterministic record id for a `(document, chunk-index)` pair.
    pub fn record_id(document_id: &str, chunk_index: i64) -> String {
        format!("{document_id}:{chunk_index}")
    }
}

/// Where a search result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// The vector knowledge base. Presumed higher-trust; wins score ties.
    Knowledge,
    /// The open web.
    Web,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Knowledge => "knowledge",
            Provenance::Web => "web",
        }
    }
}

/// Transient, per-query evidence item. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub content: String,
    /// Similarity or relevance score in [0, 1].
    pub score: f32,
    pub provenance: Provenance,
    /// Document id for knowledge results, URL for web results.
    pub source: String,
    pub title: String,
    pub group_id: Option<i64>,
}
