//! Embedding client abstraction and HTTP implementation.
//!
//! [`EmbeddingClient`] turns batches of text into fixed-dimension vectors.
//! The HTTP implementation targets an OpenAI-compatible `/embeddings`
//! endpoint with batching, exponential-backoff retry, and transient/permanent
//! error classification:
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! A batch either embeds completely or fails completely; partial results are
//! never returned, so a half-embedded document can never look finished.
//!
//! Vectors are L2-normalized before they leave the adapter, which makes the
//! store's inner-product scores cosine-equivalent and keeps them in [0, 1]
//! for non-degenerate text.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Produces embedding vectors aligned positionally with the input texts.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Model identifier (e.g. `"BAAI/bge-large-zh-v1.5"`).
    fn model_name(&self) -> &str;
    /// Vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts. Output index i corresponds to input index i.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(client: &dyn EmbeddingClient, text: &str) -> Result<Vec<f32>> {
    let results = client.embed(&[text.to_string()]).await?;
    results.into_iter().next().ok_or(Error::PermanentUpstream {
        stage: "embedding",
        message: "empty embedding response".into(),
    })
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints.
pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl HttpEmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| Error::Input(format!("{} environment variable not set", config.api_key_env)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::PermanentUpstream {
                stage: "embedding",
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
            "encoding_format": "float",
        });

        let mut last_err: Option<Error> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, ?delay, "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }

            match self.try_once(&body).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, "transient embedding failure");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err
            .unwrap_or(Error::TransientUpstream {
                stage: "embedding",
                message: "embedding failed".into(),
            })
            .into_permanent())
    }

    async fn try_once(&self, body: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let resp = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::TransientUpstream {
                stage: "embedding",
                message: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            let json: serde_json::Value =
                resp.json().await.map_err(|e| Error::PermanentUpstream {
                    stage: "embedding",
                    message: format!("invalid response body: {e}"),
                })?;
            return parse_embeddings_response(&json);
        }

        let text = resp.text().await.unwrap_or_default();
        if status.as_u16() == 429 || status.is_server_error() {
            Err(Error::TransientUpstream {
                stage: "embedding",
                message: format!("HTTP {status}: {text}"),
            })
        } else {
            Err(Error::PermanentUpstream {
                stage: "embedding",
                message: format!("HTTP {status}: {text}"),
            })
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let mut vectors = self.embed_batch(batch).await?;
            if vectors.len() != batch.len() {
                return Err(Error::PermanentUpstream {
                    stage: "embedding",
                    message: format!(
                        "response count mismatch: sent {}, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                });
            }
            for v in &mut vectors {
                l2_normalize(v);
            }
            all.append(&mut vectors);
        }
        debug!(texts = texts.len(), model = %self.model, "embedded batch");
        Ok(all)
    }
}

/// Extract `data[].embedding` arrays in input order.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or(Error::PermanentUpstream {
            stage: "embedding",
            message: "invalid response: missing data array".into(),
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or(Error::PermanentUpstream {
                stage: "embedding",
                message: "invalid response: missing embedding".into(),
            })?;
        embeddings.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }
    Ok(embeddings)
}

/// Normalize a vector to unit L2 length in place. Zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Inner product of two vectors; cosine similarity when both are normalized.
/// Returns 0.0 for empty or mismatched-length inputs.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
