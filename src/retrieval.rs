//! Knowledge-base retrieval: query embedding plus similarity search.

use std::sync::Arc;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingClient};
use crate::error::Result;
use crate::models::{Provenance, SearchResult};
use crate::vector_store::{VectorFilter, VectorStore};

/// Per-call overrides for the retrieval knobs. Unset fields fall back to
/// the configured defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOverrides {
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
}

pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingClient>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    /// Retrieve the best-matching chunks for a query within a tenant scope.
    ///
    /// Results score at or above the similarity threshold (per-call
    /// override or the configured default) and are sorted by score
    /// descending. An empty result is a valid answer, not an error, and a
    /// blank query short-circuits to one.
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        overrides: QueryOverrides,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;
        let filter = VectorFilter {
            user_id: user_id.to_string(),
            group_id,
        };
        let hits = self
            .store
            .search(
                &vector,
                &filter,
                overrides.top_k.unwrap_or(self.config.top_k),
                overrides
                    .similarity_threshold
                    .unwrap_or(self.config.similarity_threshold),
            )
            .await?;

        debug!(query_len = query.len(), hits = hits.len(), "knowledge retrieval");
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                content: hit.chunk_content,
                score: hit.score,
                provenance: Provenance::Knowledge,
                source: hit.document_id,
                title: hit.document_name,
                group_id: hit.group_id,
            })
            .collect())
    }
}
