//! Query orchestration: strategy resolution, per-source timeouts, fusion,
//! and optional reranking.
//!
//! The reasoning attached to a response reflects what actually happened: a
//! source that failed or timed out is reported, never papered over, and a
//! claim like "knowledge base is sufficient" is only made when the probe
//! genuinely met the thresholds.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::{RerankConfig, RetrievalConfig, StrategyConfig, WebSearchConfig};
use crate::error::{Error, Result};
use crate::fusion::fuse;
use crate::models::SearchResult;
use crate::rerank::Reranker;
use crate::retrieval::{QueryOverrides, RetrievalEngine};
use crate::strategy::{decide, SearchStrategy};
use crate::websearch::WebSearchClient;

/// Evidence bundle returned for a query. `strategy` is always concrete:
/// `auto` is resolved before the response is built.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResponse {
    pub strategy: SearchStrategy,
    pub reasoning: String,
    pub results: Vec<SearchResult>,
}

/// A search response plus a pre-formatted context block for prompt
/// assembly.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatSearchResponse {
    pub strategy: SearchStrategy,
    pub reasoning: String,
    pub results: Vec<SearchResult>,
    pub context: String,
}

pub struct KnowledgeEngine {
    retrieval: RetrievalEngine,
    web: Arc<dyn WebSearchClient>,
    reranker: Option<Arc<dyn Reranker>>,
    strategy_config: StrategyConfig,
    max_results: usize,
    query_timeout: Duration,
    web_top_k: usize,
    rerank_top_k: usize,
}

impl KnowledgeEngine {
    pub fn new(
        retrieval: RetrievalEngine,
        web: Arc<dyn WebSearchClient>,
        reranker: Option<Arc<dyn Reranker>>,
        retrieval_config: &RetrievalConfig,
        strategy_config: StrategyConfig,
        web_config: &WebSearchConfig,
        rerank_config: &RerankConfig,
    ) -> Self {
        Self {
            retrieval,
            web,
            reranker,
            strategy_config,
            max_results: retrieval_config.max_results,
            query_timeout: Duration::from_secs(retrieval_config.query_timeout_secs),
            web_top_k: web_config.top_k,
            rerank_top_k: rerank_config.top_k,
        }
    }

    /// Run a query under the requested strategy with the configured
    /// retrieval knobs.
    pub async fn search(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        strategy: SearchStrategy,
    ) -> Result<SearchResponse> {
        self.search_with(query, user_id, group_id, strategy, QueryOverrides::default())
            .await
    }

    /// Run a query under the requested strategy, with per-call overrides
    /// for `top_k` and the similarity threshold.
    pub async fn search_with(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        strategy: SearchStrategy,
        overrides: QueryOverrides,
    ) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::Input("query is empty".into()));
        }

        let response = match strategy {
            SearchStrategy::None => SearchResponse {
                strategy: SearchStrategy::None,
                reasoning: "retrieval disabled by caller".to_string(),
                results: Vec::new(),
            },
            SearchStrategy::KnowledgeOnly => {
                let results = self.knowledge(query, user_id, group_id, overrides).await?;
                SearchResponse {
                    strategy: SearchStrategy::KnowledgeOnly,
                    reasoning: "knowledge-only strategy requested by caller".to_string(),
                    results: fuse(results, Vec::new(), self.max_results),
                }
            }
            SearchStrategy::WebOnly => {
                let results = self.web_search(query).await?;
                SearchResponse {
                    strategy: SearchStrategy::WebOnly,
                    reasoning: "web-only strategy requested by caller".to_string(),
                    results: fuse(Vec::new(), results, self.max_results),
                }
            }
            SearchStrategy::Hybrid => {
                self.hybrid(
                    query,
                    user_id,
                    group_id,
                    overrides,
                    None,
                    "hybrid strategy requested by caller".to_string(),
                )
                .await?
            }
            SearchStrategy::Auto => self.auto(query, user_id, group_id, overrides).await?,
        };

        self.maybe_rerank(query, response).await
    }

    /// Like [`search`](Self::search), with the evidence also rendered as a
    /// numbered context block for prompt assembly.
    pub async fn chat_search(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        strategy: SearchStrategy,
    ) -> Result<ChatSearchResponse> {
        self.chat_search_with(query, user_id, group_id, strategy, QueryOverrides::default())
            .await
    }

    /// [`chat_search`](Self::chat_search) with per-call retrieval overrides.
    pub async fn chat_search_with(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        strategy: SearchStrategy,
        overrides: QueryOverrides,
    ) -> Result<ChatSearchResponse> {
        let response = self
            .search_with(query, user_id, group_id, strategy, overrides)
            .await?;
        let context = format_context(&response.results);
        Ok(ChatSearchResponse {
            strategy: response.strategy,
            reasoning: response.reasoning,
            results: response.results,
            context,
        })
    }

    /// Probe the knowledge base, then commit to a concrete strategy.
    async fn auto(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        overrides: QueryOverrides,
    ) -> Result<SearchResponse> {
        let probe = match self.knowledge(query, user_id, group_id, overrides).await {
            Ok(results) => results,
            Err(e) => {
                // Knowledge base down: the web is the only option left.
                warn!(error = %e, "knowledge probe failed, falling back to web");
                let results = self.web_search(query).await?;
                return Ok(SearchResponse {
                    strategy: SearchStrategy::WebOnly,
                    reasoning: format!("knowledge base unavailable ({e}); using web search only"),
                    results: fuse(Vec::new(), results, self.max_results),
                });
            }
        };

        let top_score = probe.first().map(|r| r.score);
        let decision = decide(probe.len(), top_score, &self.strategy_config);

        match decision.strategy {
            SearchStrategy::KnowledgeOnly => Ok(SearchResponse {
                strategy: SearchStrategy::KnowledgeOnly,
                reasoning: decision.reasoning,
                results: fuse(probe, Vec::new(), self.max_results),
            }),
            SearchStrategy::WebOnly => {
                let results = self.web_search(query).await?;
                Ok(SearchResponse {
                    strategy: SearchStrategy::WebOnly,
                    reasoning: decision.reasoning,
                    results: fuse(Vec::new(), results, self.max_results),
                })
            }
            _ => {
                self.hybrid(
                    query,
                    user_id,
                    group_id,
                    overrides,
                    Some(probe),
                    decision.reasoning,
                )
                .await
            }
        }
    }

    /// Query both sources concurrently. A source that fails or times out is
    /// dropped from fusion and noted in the reasoning; the query only fails
    /// when no source produced evidence.
    async fn hybrid(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        overrides: QueryOverrides,
        knowledge_probe: Option<Vec<SearchResult>>,
        mut reasoning: String,
    ) -> Result<SearchResponse> {
        let (knowledge, web) = match knowledge_probe {
            Some(probe) => (Ok(probe), self.web_search(query).await),
            None => {
                tokio::join!(
                    self.knowledge(query, user_id, group_id, overrides),
                    self.web_search(query)
                )
            }
        };

        let (knowledge, web) = match (knowledge, web) {
            (Ok(k), Ok(w)) => (k, w),
            (Ok(k), Err(e)) => {
                warn!(error = %e, "web search failed, continuing with knowledge only");
                reasoning.push_str(&format!("; web search failed ({e})"));
                (k, Vec::new())
            }
            (Err(e), Ok(w)) => {
                warn!(error = %e, "knowledge search failed, continuing with web only");
                reasoning.push_str(&format!("; knowledge search failed ({e})"));
                (Vec::new(), w)
            }
            (Err(ke), Err(we)) => {
                return Err(Error::PermanentUpstream {
                    stage: "search",
                    message: format!("all evidence sources failed: knowledge: {ke}; web: {we}"),
                });
            }
        };

        Ok(SearchResponse {
            strategy: SearchStrategy::Hybrid,
            reasoning,
            results: fuse(knowledge, web, self.max_results),
        })
    }

    async fn knowledge(
        &self,
        query: &str,
        user_id: &str,
        group_id: Option<i64>,
        overrides: QueryOverrides,
    ) -> Result<Vec<SearchResult>> {
        match tokio::time::timeout(
            self.query_timeout,
            self.retrieval.search(query, user_id, group_id, overrides),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TransientUpstream {
                stage: "retrieval",
                message: format!("timed out after {:?}", self.query_timeout),
            }),
        }
    }

    async fn web_search(&self, query: &str) -> Result<Vec<SearchResult>> {
        match tokio::time::timeout(self.query_timeout, self.web.search(query, self.web_top_k))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::TransientUpstream {
                stage: "web_search",
                message: format!("timed out after {:?}", self.query_timeout),
            }),
        }
    }

    /// Rerank failures are soft: the fused order is already usable.
    async fn maybe_rerank(&self, query: &str, response: SearchResponse) -> Result<SearchResponse> {
        let Some(reranker) = &self.reranker else {
            return Ok(response);
        };
        if response.results.is_empty() {
            return Ok(response);
        }

        match reranker
            .rerank(query, response.results.clone(), self.rerank_top_k)
            .await
        {
            Ok(results) => Ok(SearchResponse { results, ..response }),
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping fused order");
                Ok(response)
            }
        }
    }
}

/// Render evidence as a numbered context block for prompt assembly.
fn format_context(results: &[SearchResult]) -> String {
    let mut context = String::new();
    for (i, result) in results.iter().enumerate() {
        context.push_str(&format!(
            "[{}] ({}) {}\n{}\n\n",
            i + 1,
            result.provenance.as_str(),
            result.title,
            result.content.trim()
        ));
    }
    context.trim_end().to_string()
}
