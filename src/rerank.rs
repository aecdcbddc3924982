//! Optional cross-encoder reranking of fused evidence.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RerankConfig;
use crate::error::{Error, Result};
use crate::models::SearchResult;

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `results` by relevance to `query`, keeping the best `top_k`.
    /// Scores on the returned results are the reranker's relevance scores.
    async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>>;
}

/// Build the reranker if enabled and configured, otherwise `None` and the
/// fused order stands.
pub fn build_reranker(config: &RerankConfig) -> Option<std::sync::Arc<dyn Reranker>> {
    if !config.enabled {
        return None;
    }
    match std::env::var(&config.api_key_env) {
        Ok(api_key) => match HttpReranker::new(config, api_key) {
            Ok(client) => Some(std::sync::Arc::new(client)),
            Err(e) => {
                warn!(error = %e, "reranker unavailable");
                None
            }
        },
        Err(_) => {
            warn!(env = %config.api_key_env, "rerank API key not set, reranking disabled");
            None
        }
    }
}

/// Client for an OpenAI-compatible `/rerank` endpoint.
pub struct HttpReranker {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpReranker {
    pub fn new(config: &RerankConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::PermanentUpstream {
                stage: "rerank",
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(
        &self,
        query: &str,
        results: Vec<SearchResult>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        if results.is_empty() {
            return Ok(results);
        }

        let documents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": top_k,
            "return_documents": false,
        });

        let resp = self
            .http
            .post(format!("{}/rerank", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientUpstream {
                stage: "rerank",
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = if status.as_u16() == 429 || status.is_server_error() {
                Error::TransientUpstream {
                    stage: "rerank",
                    message: format!("HTTP {status}: {text}"),
                }
            } else {
                Error::PermanentUpstream {
                    stage: "rerank",
                    message: format!("HTTP {status}: {text}"),
                }
            };
            return Err(err);
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| Error::PermanentUpstream {
            stage: "rerank",
            message: format!("invalid response body: {e}"),
        })?;

        let reranked = apply_rerank_response(&json, &results, top_k)?;
        debug!(input = results.len(), output = reranked.len(), "reranked");
        Ok(reranked)
    }
}

/// Map `results[].{index, relevance_score}` back onto the candidates, in the
/// API's order. Out-of-range indices fail the whole call rather than
/// silently mixing up evidence.
fn apply_rerank_response(
    json: &serde_json::Value,
    candidates: &[SearchResult],
    top_k: usize,
) -> Result<Vec<SearchResult>> {
    let entries = json
        .get("results")
        .and_then(|v| v.as_array())
        .ok_or(Error::PermanentUpstream {
            stage: "rerank",
            message: "invalid response: missing results array".into(),
        })?;

    let mut reranked = Vec::with_capacity(entries.len().min(top_k));
    for entry in entries.iter().take(top_k) {
        let index = entry
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or(Error::PermanentUpstream {
                stage: "rerank",
                message: "invalid response: missing index".into(),
            })? as usize;
        let score = entry
            .get("relevance_score")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as f32;

        let candidate = candidates.get(index).ok_or(Error::PermanentUpstream {
            stage: "rerank",
            message: format!("index {index} out of range for {} candidates", candidates.len()),
        })?;
        let mut result = candidate.clone();
        result.score = score;
        reranked.push(result);
    }
    Ok(reranked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn result(content: &str, score: f32) -> SearchResult {
        SearchResult {
            content: content.to_string(),
            score,
            provenance: Provenance::Knowledge,
            source: "doc".to_string(),
            title: "doc".to_string(),
            group_id: None,
        }
    }

    #[test]
    fn test_apply_rerank_reorders_and_rescores() {
        let candidates = vec![result("a", 0.9), result("b", 0.8), result("c", 0.7)];
        let json = serde_json::json!({
            "results": [
                { "index": 2, "relevance_score": 0.99 },
                { "index": 0, "relevance_score": 0.42 },
            ]
        });
        let out = apply_rerank_response(&json, &candidates, 5).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "c");
        assert!((out[0].score - 0.99).abs() < 1e-6);
        assert_eq!(out[1].content, "a");
    }

    #[test]
    fn test_apply_rerank_truncates_to_top_k() {
        let candidates = vec![result("a", 0.9), result("b", 0.8)];
        let json = serde_json::json!({
            "results": [
                { "index": 0, "relevance_score": 0.9 },
                { "index": 1, "relevance_score": 0.5 },
            ]
        });
        let out = apply_rerank_response(&json, &candidates, 1).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "a");
    }

    #[test]
    fn test_apply_rerank_rejects_bad_index() {
        let candidates = vec![result("a", 0.9)];
        let json = serde_json::json!({
            "results": [ { "index": 9, "relevance_score": 0.9 } ]
        });
        assert!(apply_rerank_response(&json, &candidates, 5).is_err());
    }
}
