//! Vector persistence and similarity search.
//!
//! Vectors are stored as little-endian f32 BLOBs in SQLite; similarity is
//! computed in Rust as an inner product over the candidate rows of one
//! tenant. At knowledge-base scale (thousands to low millions of chunks per
//! tenant) a linear scan is fast enough and keeps the storage engine to a
//! single file.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::embedding::{blob_to_vec, inner_product, vec_to_blob};
use crate::error::Result;
use crate::models::VectorRecord;

/// Tenant scope for a similarity query. `group_id = None` searches across
/// all of the user's groups.
#[derive(Debug, Clone)]
pub struct VectorFilter {
    pub user_id: String,
    pub group_id: Option<i64>,
}

/// A scored record returned from a similarity search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub record_id: String,
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub chunk_content: String,
    pub group_id: Option<i64>,
    pub score: f32,
}

/// Storage seam for vector records. The SQLite implementation is the only
/// production backend; tests may substitute their own.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace records. Record ids derived from
    /// `(document_id, chunk_index)` make this idempotent per document.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()>;

    /// Top-k records by inner product, within the tenant scope, scoring at
    /// or above `threshold`. Results are sorted by score descending.
    async fn search(
        &self,
        query: &[f32],
        filter: &VectorFilter,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>>;

    /// Remove every record of a document within a tenant. Returns the
    /// number of rows deleted.
    async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<u64>;

    /// Remove every record in a group within a tenant.
    async fn delete_group(&self, group_id: i64, user_id: &str) -> Result<u64>;

    /// Number of records stored for a document.
    async fn count_document(&self, document_id: &str) -> Result<i64>;
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO vector_records
                    (id, document_id, document_name, chunk_index, chunk_content,
                     embedding, source_path, content_type, user_id, group_id,
                     created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.id)
            .bind(&record.document_id)
            .bind(&record.document_name)
            .bind(record.chunk_index)
            .bind(&record.chunk_content)
            .bind(vec_to_blob(&record.embedding))
            .bind(&record.source_path)
            .bind(&record.content_type)
            .bind(&record.user_id)
            .bind(record.group_id)
            .bind(record.created_at.to_rfc3339())
            .bind(record.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = records.len(), "upserted vector records");
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        filter: &VectorFilter,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<VectorHit>> {
        let rows = match filter.group_id {
            Some(group_id) => {
                sqlx::query(
                    r#"
                    SELECT id, document_id, document_name, chunk_index,
                           chunk_content, embedding, group_id
                    FROM vector_records
                    WHERE user_id = ? AND group_id = ?
                    "#,
                )
                .bind(&filter.user_id)
                .bind(group_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT id, document_id, document_name, chunk_index,
                           chunk_content, embedding, group_id
                    FROM vector_records
                    WHERE user_id = ?
                    "#,
                )
                .bind(&filter.user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut hits: Vec<VectorHit> = Vec::new();
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_vec(&blob);
            let score = inner_product(query, &embedding);
            if score >= threshold {
                hits.push(VectorHit {
                    record_id: row.get("id"),
                    document_id: row.get("document_id"),
                    document_name: row.get("document_name"),
                    chunk_index: row.get("chunk_index"),
                    chunk_content: row.get("chunk_content"),
                    group_id: row.get("group_id"),
                    score,
                });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str, user_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM vector_records WHERE document_id = ? AND user_id = ?")
                .bind(document_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_group(&self, group_id: i64, user_id: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM vector_records WHERE group_id = ? AND user_id = ?")
                .bind(group_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn count_document(&self, document_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_records WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
