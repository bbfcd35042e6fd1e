use async_trait::async_trait;
use mio_core::similarity::hashing_embedding;
use serde::{Deserialize, Serialize};

use super::{UpstreamError, check_status};

const SERVICE: &str = "openai-embeddings";

/// Text → fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored next to every persisted embedding.
    fn model(&self) -> &str;

    fn dimensions(&self) -> usize;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, UpstreamError>;

    async fn embed(&self, text: &str) -> Result<Vec<f64>, UpstreamError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or(UpstreamError::Payload {
            service: SERVICE,
            message: "no embedding returned".to_string(),
        })
    }
}

pub struct OpenAiEmbedder {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        http: reqwest::Client,
        base_url: &url::Url,
        api_key: String,
        model: String,
        dimensions: usize,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/embeddings", base_url.as_str().trim_end_matches('/')),
            api_key,
            model,
            dimensions,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f64>,
}

/// Order vectors by their `index` and check count and width.
fn collect_vectors(
    mut response: EmbeddingsResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f64>>, UpstreamError> {
    if response.data.len() != expected {
        return Err(UpstreamError::Payload {
            service: SERVICE,
            message: format!(
                "expected {expected} embeddings, got {}",
                response.data.len()
            ),
        });
    }
    response.data.sort_by_key(|item| item.index);

    let mut out = Vec::with_capacity(expected);
    for item in response.data {
        if item.embedding.len() != dimensions {
            return Err(UpstreamError::Payload {
                service: SERVICE,
                message: format!(
                    "embedding {} has {} dimensions, expected {dimensions}",
                    item.index,
                    item.embedding.len()
                ),
            });
        }
        out.push(item.embedding);
    }
    Ok(out)
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, UpstreamError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: texts,
                dimensions: self.dimensions,
            })
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                service: SERVICE,
                source,
            })?;

        let parsed: EmbeddingsResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| UpstreamError::Payload {
                service: SERVICE,
                message: err.to_string(),
            })?;

        collect_vectors(parsed, texts.len(), self.dimensions)
    }
}

/// Deterministic local embedder used when no provider key is configured.
pub struct HashingEmbedder {
    dimensions: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model: format!("hashing-{dimensions}"),
        }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, UpstreamError> {
        Ok(texts
            .iter()
            .map(|text| hashing_embedding(text, self.dimensions))
            .collect())
    }
}
