use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Characters carried over between consecutive chunks.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    512
}
fn default_overlap() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint.
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_embedding_url(),
            api_key_env: default_api_key_env(),
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.siliconflow.cn/v1".to_string()
}
fn default_api_key_env() -> String {
    "SILICONFLOW_API_KEY".to_string()
}
fn default_embedding_model() -> String {
    "BAAI/bge-large-zh-v1.5".to_string()
}
fn default_dims() -> usize {
    1024
}
fn default_batch_size() -> usize {
    10
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// Final evidence cap after fusion.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    /// Per-source timeout for query-time operations.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            max_results: default_max_results(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_top_k() -> usize {
    10
}
fn default_similarity_threshold() -> f32 {
    0.7
}
fn default_max_results() -> usize {
    12
}
fn default_query_timeout_secs() -> u64 {
    10
}

/// Confidence thresholds for the automatic strategy decision.
///
/// These are tuning knobs, not hard constants: deployments with sparse
/// knowledge bases typically lower `min_results`.
#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    /// Knowledge results required (together with `high_confidence`) to skip
    /// the web entirely.
    #[serde(default = "default_min_results")]
    pub min_results: usize,
    /// Top-score floor for the knowledge-only branch.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_results: default_min_results(),
            high_confidence: default_high_confidence(),
        }
    }
}

fn default_min_results() -> usize {
    3
}
fn default_high_confidence() -> f32 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebSearchConfig {
    #[serde(default = "default_web_search_enabled")]
    pub enabled: bool,
    #[serde(default = "default_web_search_url")]
    pub base_url: String,
    #[serde(default = "default_web_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_web_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_search_enabled(),
            base_url: default_web_search_url(),
            api_key_env: default_web_api_key_env(),
            top_k: default_web_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_web_search_enabled() -> bool {
    true
}
fn default_web_search_url() -> String {
    "https://api.bochaai.com/v1".to_string()
}
fn default_web_api_key_env() -> String {
    "WEB_SEARCH_API_KEY".to_string()
}
fn default_web_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_rerank_top_k")]
    pub top_k: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_embedding_url(),
            api_key_env: default_api_key_env(),
            model: default_rerank_model(),
            top_k: default_rerank_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_model() -> String {
    "BAAI/bge-reranker-v2-m3".to_string()
}
fn default_rerank_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Number of worker tasks draining the ingestion queue.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    2
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if !(0.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&config.strategy.high_confidence) {
        anyhow::bail!("strategy.high_confidence must be in [0.0, 1.0]");
    }
    if config.retrieval.max_results == 0 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }

    Ok(config)
}
