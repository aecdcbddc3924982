//! Web search client abstraction.
//!
//! Web results carry a fixed default relevance score (0.8): the search API
//! returns ranked pages without comparable similarity scores, and a fixed
//! value keeps web evidence competitive with, but not dominant over,
//! high-confidence knowledge results during fusion.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::WebSearchConfig;
use crate::error::{Error, Result};
use crate::models::{Provenance, SearchResult};

/// Score assigned to web results in lieu of a real similarity measure.
pub const WEB_DEFAULT_SCORE: f32 = 0.8;

#[async_trait]
pub trait WebSearchClient: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>>;
}

/// Build the configured web search client. Falls back to the offline stub
/// when web search is disabled or no API key is present, so the hybrid path
/// stays exercisable in development.
pub fn build_web_search(config: &WebSearchConfig) -> std::sync::Arc<dyn WebSearchClient> {
    if config.enabled {
        if let Ok(api_key) = std::env::var(&config.api_key_env) {
            match HttpWebSearchClient::new(config, api_key) {
                Ok(client) => return std::sync::Arc::new(client),
                Err(e) => warn!(error = %e, "web search client unavailable, using stub"),
            }
        } else {
            warn!(env = %config.api_key_env, "web search API key not set, using stub");
        }
    }
    std::sync::Arc::new(StubWebSearchClient)
}

/// Client for a Bocha-style `/web-search` endpoint.
pub struct HttpWebSearchClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpWebSearchClient {
    pub fn new(config: &WebSearchConfig, api_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::PermanentUpstream {
                stage: "web_search",
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl WebSearchClient for HttpWebSearchClient {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        let body = serde_json::json!({
            "query": query,
            "summary": true,
            "count": top_k,
        });

        let resp = self
            .http
            .post(format!("{}/web-search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::TransientUpstream {
                stage: "web_search",
                message: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = if status.as_u16() == 429 || status.is_server_error() {
                Error::TransientUpstream {
                    stage: "web_search",
                    message: format!("HTTP {status}: {text}"),
                }
            } else {
                Error::PermanentUpstream {
                    stage: "web_search",
                    message: format!("HTTP {status}: {text}"),
                }
            };
            return Err(err);
        }

        let json: serde_json::Value = resp.json().await.map_err(|e| Error::PermanentUpstream {
            stage: "web_search",
            message: format!("invalid response body: {e}"),
        })?;

        let results = parse_web_response(&json, top_k);
        debug!(query_len = query.len(), results = results.len(), "web search");
        Ok(results)
    }
}

fn parse_web_response(json: &serde_json::Value, top_k: usize) -> Vec<SearchResult> {
    let pages = json
        .pointer("/data/webPages/value")
        .and_then(|v| v.as_array())
        .map(|v| v.as_slice())
        .unwrap_or(&[]);

    pages
        .iter()
        .take(top_k)
        .map(|page| {
            let content = page
                .get("summary")
                .or_else(|| page.get("snippet"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            SearchResult {
                content,
                score: WEB_DEFAULT_SCORE,
                provenance: Provenance::Web,
                source: page
                    .get("url")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                title: page
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                group_id: None,
            }
        })
        .filter(|r| !r.content.is_empty())
        .collect()
}

/// Offline placeholder used when no web search backend is configured.
/// Results are clearly marked so they are never mistaken for real evidence.
pub struct StubWebSearchClient;

#[async_trait]
impl WebSearchClient for StubWebSearchClient {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        Ok((0..top_k.min(3))
            .map(|i| SearchResult {
                content: format!(
                    "[offline stub] no web search backend configured; \
                     placeholder result {} for query: {query}",
                    i + 1
                ),
                score: WEB_DEFAULT_SCORE,
                provenance: Provenance::Web,
                source: format!("https://example.invalid/result/{}", i + 1),
                title: format!("Placeholder result {}", i + 1),
                group_id: None,
            })
            .collect())
    }
}
