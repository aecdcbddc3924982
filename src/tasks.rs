//! Ingestion task lifecycle: submission, execution, cancellation, cleanup.
//!
//! Every document submission creates one task row that moves through
//! `pending -> processing -> completed | failed`. Execution is resumable in
//! the sense that it is idempotent: record ids derive from
//! `(document_id, chunk_index)`, so re-running a document overwrites its
//! previous vectors instead of duplicating them.
//!
//! Workers claim tasks with a conditional UPDATE on the pending status, so a
//! task is executed by at most one worker even with several draining the
//! queue. Cancellation is cooperative: the owner clears the `active` flag
//! and the executing worker notices between embedding batches, rolls back
//! the document's vectors, and marks the task failed.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chunk::{chunk_text, TextChunk};
use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::models::{IngestionTask, KnowledgeGroup, TaskSnapshot, TaskStatus, VectorRecord};
use crate::vector_store::VectorStore;

/// Coordinates ingestion tasks over the task table, the vector store, and
/// the embedding client.
pub struct IngestionTaskManager {
    pool: SqlitePool,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    chunking: ChunkingConfig,
    /// Chunks embedded per progress update and cancellation check.
    batch_size: usize,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl IngestionTaskManager {
    pub fn new(
        pool: SqlitePool,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            pool,
            store,
            embedder,
            chunking,
            batch_size: batch_size.max(1),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Submit pasted text for ingestion. Validates synchronously and
    /// enqueues the embedding work; returns the pending task snapshot.
    pub async fn submit_text(
        &self,
        user_id: &str,
        group_id: Option<i64>,
        document_name: &str,
        text: &str,
    ) -> Result<TaskSnapshot> {
        if text.trim().is_empty() {
            return Err(Error::Input("document text is empty".into()));
        }
        self.create_task(
            user_id,
            group_id,
            document_name,
            "text/plain",
            "",
            Some(text),
        )
        .await
    }

    /// Submit a file for ingestion. Only plain-text formats are accepted;
    /// the file is read lazily by the executing worker.
    pub async fn submit_file(
        &self,
        user_id: &str,
        group_id: Option<i64>,
        path: &Path,
    ) -> Result<TaskSnapshot> {
        let content_type = content_type_for(path)?;
        if !path.is_file() {
            return Err(Error::Input(format!("file not found: {}", path.display())));
        }
        let document_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        self.create_task(
            user_id,
            group_id,
            &document_name,
            content_type,
            &path.to_string_lossy(),
            None,
        )
        .await
    }

    async fn create_task(
        &self,
        user_id: &str,
        group_id: Option<i64>,
        document_name: &str,
        content_type: &str,
        source_path: &str,
        content: Option<&str>,
    ) -> Result<TaskSnapshot> {
        if user_id.trim().is_empty() {
            return Err(Error::Input("user_id is required".into()));
        }
        if let Some(gid) = group_id {
            self.require_group(gid, user_id).await?;
        }

        let task_id = Uuid::new_v4().to_string();
        // Document identity is the tenant-scoped name, so resubmitting the
        // same document replaces its vectors instead of duplicating them.
        let document_id = document_id_for(user_id, group_id, document_name);
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO ingestion_tasks
                (id, document_id, document_name, content_type, user_id, group_id,
                 source_path, content, status, progress, total_chunks,
                 processed_chunks, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', 0, 0, 0, 1, ?, ?)
            "#,
        )
        .bind(&task_id)
        .bind(&document_id)
        .bind(document_name)
        .bind(content_type)
        .bind(user_id)
        .bind(group_id)
        .bind(source_path)
        .bind(content)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        // Enqueue for the workers; if none are running the message waits.
        let _ = self.tx.send(task_id.clone());

        info!(task_id = %task_id, document = %document_name, "ingestion task created");
        Ok(TaskSnapshot {
            task_id,
            status: TaskStatus::Pending,
            progress: 0,
            error_message: None,
        })
    }

    /// Current status of a task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskSnapshot> {
        let task = self.load_task(task_id).await?;
        Ok(TaskSnapshot {
            task_id: task.id,
            status: task.status,
            progress: task.progress,
            error_message: task.error_message,
        })
    }

    /// Request cancellation of a pending or processing task. The executing
    /// worker honors the request at its next batch boundary.
    pub async fn cancel_task(&self, task_id: &str, user_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET active = 0, updated_at = ?
            WHERE id = ? AND user_id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Input(format!(
                "task {task_id} not found or already finished"
            )));
        }
        info!(task_id, "cancellation requested");
        Ok(())
    }

    /// Delete a document: purge its vectors and tombstone its tasks.
    /// Returns the number of vector records removed.
    pub async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<u64> {
        let deleted = self.store.delete_document(document_id, user_id).await?;

        sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET active = 0, updated_at = ?
            WHERE document_id = ? AND user_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(document_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        info!(document_id, deleted, "document deleted");
        Ok(deleted)
    }

    /// Create a knowledge group for a user. Names are unique per user.
    pub async fn create_group(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<KnowledgeGroup> {
        if name.trim().is_empty() {
            return Err(Error::Input("group name is required".into()));
        }
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO knowledge_groups (name, description, user_id, active, created_at, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(user_id)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                Error::Input(format!("group '{name}' already exists"))
            }
            other => Error::Storage(other),
        })?;

        Ok(KnowledgeGroup {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            description: description.to_string(),
            user_id: user_id.to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        })
    }

    /// Delete a group: tombstone the group row and every task submitted
    /// against it, then purge its vectors. Tombstoning the tasks first
    /// means a pending or mid-flight ingestion observes the cancellation at
    /// its next batch check instead of repopulating the deleted group.
    pub async fn delete_group(&self, group_id: i64, user_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_groups
            SET active = 0, updated_at = ?
            WHERE id = ? AND user_id = ? AND active = 1
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Input(format!("group {group_id} not found")));
        }

        sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET active = 0, updated_at = ?
            WHERE group_id = ? AND user_id = ?
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(group_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let deleted = self.store.delete_group(group_id, user_id).await?;
        info!(group_id, deleted, "group deleted");
        Ok(deleted)
    }

    /// Active groups owned by a user.
    pub async fn list_groups(&self, user_id: &str) -> Result<Vec<KnowledgeGroup>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, user_id, active, created_at, updated_at
            FROM knowledge_groups
            WHERE user_id = ? AND active = 1
            ORDER BY id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(KnowledgeGroup {
                    id: row.get("id"),
                    name: row.get("name"),
                    description: row.get("description"),
                    user_id: row.get("user_id"),
                    active: row.get::<i64, _>("active") != 0,
                    created_at: parse_timestamp(row.get("created_at"))?,
                    updated_at: parse_timestamp(row.get("updated_at"))?,
                })
            })
            .collect()
    }

    async fn require_group(&self, group_id: i64, user_id: &str) -> Result<()> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM knowledge_groups WHERE id = ? AND user_id = ? AND active = 1",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        if count == 0 {
            return Err(Error::Input(format!("group {group_id} does not exist")));
        }
        Ok(())
    }

    /// Execute one task end to end. Pipeline failures are recorded on the
    /// task row rather than propagated; only storage errors bubble up.
    pub async fn run_task(&self, task_id: &str) -> Result<()> {
        if !self.claim(task_id).await? {
            debug!(task_id, "task not claimable, skipping");
            return Ok(());
        }

        let task = self.load_task(task_id).await?;
        // A task is only completed once its row says so; a failed
        // completion update falls through to the rollback path rather than
        // leaving a completed-looking task stuck in `processing`.
        let outcome = match self.process(&task).await {
            Ok(total) => self.mark_completed(task_id, total).await.map(|()| total),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(total) => {
                info!(task_id, chunks = total, "ingestion completed");
                Ok(())
            }
            Err(e) => {
                // Partial output must not survive a failed task.
                if let Err(re) = self
                    .store
                    .delete_document(&task.document_id, &task.user_id)
                    .await
                {
                    error!(task_id, error = %re, "rollback failed");
                }
                let message = e.to_string();
                warn!(task_id, error = %message, "ingestion failed");
                self.mark_failed(task_id, &message).await?;
                Ok(())
            }
        }
    }

    async fn process(&self, task: &IngestionTask) -> Result<i64> {
        let text = match &task.content {
            Some(content) => content.clone(),
            None => tokio::fs::read_to_string(&task.source_path)
                .await
                .map_err(|e| Error::PermanentUpstream {
                    stage: "read",
                    message: format!("{}: {e}", task.source_path),
                })?,
        };

        let chunks = chunk_text(&text, self.chunking.chunk_size, self.chunking.overlap);
        if chunks.is_empty() {
            return Err(Error::Input("no extractable content in document".into()));
        }
        let total = chunks.len() as i64;
        self.set_total_chunks(&task.id, total).await?;

        // Clear any previous version so a shrunken document leaves no
        // stale high-index chunks behind.
        self.store
            .delete_document(&task.document_id, &task.user_id)
            .await?;

        let mut processed = 0i64;
        for batch in chunks.chunks(self.batch_size) {
            if !self.is_active(&task.id).await? {
                return Err(Error::Cancelled);
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Consistency(format!(
                    "embedded {} vectors for {} chunks",
                    vectors.len(),
                    batch.len()
                )));
            }

            let records = self.build_records(task, batch, vectors);
            self.store.upsert(&records).await?;

            processed += batch.len() as i64;
            // 100 is reserved for the completed state.
            let progress = (processed * 100 / total).min(99);
            self.set_progress(&task.id, processed, progress).await?;
        }

        Ok(total)
    }

    fn build_records(
        &self,
        task: &IngestionTask,
        chunks: &[TextChunk],
        vectors: Vec<Vec<f32>>,
    ) -> Vec<VectorRecord> {
        let now = Utc::now();
        chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, embedding)| VectorRecord {
                id: VectorRecord::record_id(&task.document_id, chunk.index),
                document_id: task.document_id.clone(),
                document_name: task.document_name.clone(),
                chunk_index: chunk.index,
                chunk_content: chunk.text.clone(),
                embedding,
                source_path: task.source_path.clone(),
                content_type: task.content_type.clone(),
                user_id: task.user_id.clone(),
                group_id: task.group_id,
                created_at: now,
                updated_at: now,
            })
            .collect()
    }

    /// Atomically transition `pending -> processing`. Returns false when
    /// another worker already claimed the task or it is not pending.
    async fn claim(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET status = 'processing', updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_active(&self, task_id: &str) -> Result<bool> {
        let active: i64 =
            sqlx::query_scalar("SELECT active FROM ingestion_tasks WHERE id = ?")
                .bind(task_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(active != 0)
    }

    async fn set_total_chunks(&self, task_id: &str, total: i64) -> Result<()> {
        sqlx::query("UPDATE ingestion_tasks SET total_chunks = ?, updated_at = ? WHERE id = ?")
            .bind(total)
            .bind(Utc::now().to_rfc3339())
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_progress(&self, task_id: &str, processed: i64, progress: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET processed_chunks = ?, progress = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(processed)
        .bind(progress)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_completed(&self, task_id: &str, total: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET status = 'completed', progress = 100, processed_chunks = ?,
                error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(total)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, task_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_tasks
            SET status = 'failed', error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load a task by id.
    pub async fn load_task(&self, task_id: &str) -> Result<IngestionTask> {
        let row = sqlx::query(
            r#"
            SELECT id, document_id, document_name, content_type, user_id, group_id,
                   source_path, content, status, progress, total_chunks,
                   processed_chunks, error_message, active, created_at, updated_at
            FROM ingestion_tasks
            WHERE id = ?
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::Input(format!("task {task_id} not found")))?;

        let status_str: String = row.get("status");
        let status = TaskStatus::parse(&status_str)
            .ok_or_else(|| Error::Consistency(format!("unknown task status '{status_str}'")))?;

        Ok(IngestionTask {
            id: row.get("id"),
            document_id: row.get("document_id"),
            document_name: row.get("document_name"),
            content_type: row.get("content_type"),
            user_id: row.get("user_id"),
            group_id: row.get("group_id"),
            source_path: row.get("source_path"),
            content: row.get("content"),
            status,
            progress: row.get("progress"),
            total_chunks: row.get("total_chunks"),
            processed_chunks: row.get("processed_chunks"),
            error_message: row.get("error_message"),
            active: row.get::<i64, _>("active") != 0,
            created_at: parse_timestamp(row.get("created_at"))?,
            updated_at: parse_timestamp(row.get("updated_at"))?,
        })
    }

    /// Start `workers` background tasks draining the submission queue.
    /// Callable once per manager.
    pub fn spawn_workers(self: &Arc<Self>, workers: usize) -> Result<()> {
        let rx = self
            .rx
            .lock()
            .map_err(|_| Error::Consistency("worker receiver lock poisoned".into()))?
            .take()
            .ok_or_else(|| Error::Consistency("workers already running".into()))?;

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for worker_id in 0..workers.max(1) {
            let manager = Arc::clone(self);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move {
                debug!(worker_id, "ingestion worker started");
                loop {
                    let task_id = { rx.lock().await.recv().await };
                    match task_id {
                        Some(task_id) => {
                            if let Err(e) = manager.run_task(&task_id).await {
                                error!(worker_id, task_id = %task_id, error = %e, "task execution error");
                            }
                        }
                        None => break,
                    }
                }
                debug!(worker_id, "ingestion worker stopped");
            });
        }
        Ok(())
    }
}

/// Deterministic document id for a `(user, group, name)` triple.
fn document_id_for(user_id: &str, group_id: Option<i64>, document_name: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0]);
    if let Some(gid) = group_id {
        hasher.update(gid.to_le_bytes());
    }
    hasher.update([0]);
    hasher.update(document_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn content_type_for(path: &Path) -> Result<&'static str> {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("txt") => Ok("text/plain"),
        Some("md") | Some("markdown") => Ok("text/markdown"),
        other => Err(Error::Input(format!(
            "unsupported file type: {}",
            other.unwrap_or("<none>")
        ))),
    }
}

fn parse_timestamp(s: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Consistency(format!("bad timestamp '{s}': {e}")))
}
