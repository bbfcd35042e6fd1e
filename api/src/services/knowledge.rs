use std::sync::Arc;

use async_trait::async_trait;
use mio_core::policy::{FailurePolicy, defaults};
use mio_core::retrieval::{
    CoachAgent, KnowledgeChunk, RankOptions, RetrievedChunk, prepare_embedding_text, rank_chunks,
};
use mio_core::similarity::parse_embedding;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use super::embedding::Embedder;
use super::{StoreError, UpstreamError};

/// Texts per embedding request.
pub const EMBEDDING_BATCH_SIZE: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("invalid chunk: {field}: {message}")]
    Validation { field: String, message: String },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Chunk as submitted for ingestion; the embedding is computed server-side.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct KnowledgeChunkInput {
    /// Stable identifier within the agent's corpus; re-ingesting replaces it
    pub chunk_key: String,
    pub chunk_text: String,
    #[serde(default)]
    pub chunk_summary: String,
    pub category: String,
    #[serde(default)]
    pub applicable_patterns: Vec<String>,
    #[serde(default)]
    pub temperament_match: Vec<String>,
    /// Minutes the protocol takes, if it is one
    #[serde(default)]
    pub time_commitment_max: Option<i32>,
    #[serde(default)]
    pub is_emergency_protocol: bool,
}

impl KnowledgeChunkInput {
    fn validate(&self, index: usize) -> Result<(), KnowledgeError> {
        if self.chunk_key.trim().is_empty() {
            return Err(KnowledgeError::Validation {
                field: format!("chunks[{index}].chunk_key"),
                message: "must not be empty".to_string(),
            });
        }
        if self.chunk_text.trim().is_empty() {
            return Err(KnowledgeError::Validation {
                field: format!("chunks[{index}].chunk_text"),
                message: "must not be empty".to_string(),
            });
        }
        if matches!(self.time_commitment_max, Some(minutes) if minutes < 0) {
            return Err(KnowledgeError::Validation {
                field: format!("chunks[{index}].time_commitment_max"),
                message: "must be >= 0".to_string(),
            });
        }
        Ok(())
    }

    fn embedding_text(&self) -> String {
        prepare_embedding_text(
            &self.chunk_text,
            &self.chunk_summary,
            &self.category,
            &self.applicable_patterns,
            &self.temperament_match,
        )
    }

    fn into_chunk(self, agent: CoachAgent, embedding: Vec<f64>) -> KnowledgeChunk {
        KnowledgeChunk {
            id: Uuid::now_v7(),
            agent,
            chunk_key: self.chunk_key.trim().to_string(),
            chunk_text: self.chunk_text,
            chunk_summary: self.chunk_summary,
            category: self.category,
            applicable_patterns: self.applicable_patterns,
            temperament_match: self.temperament_match,
            time_commitment_max: self.time_commitment_max,
            is_emergency_protocol: self.is_emergency_protocol,
            embedding,
        }
    }
}

/// Per-agent chunk storage. Embeddings are only comparable within one
/// model, so reads are scoped to it.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn chunks_for_agent(
        &self,
        agent: CoachAgent,
        model: &str,
    ) -> Result<Vec<KnowledgeChunk>, StoreError>;

    /// Insert or replace by (agent, chunk_key). Returns rows written.
    async fn upsert_chunks(&self, chunks: &[KnowledgeChunk], model: &str)
    -> Result<usize, StoreError>;
}

pub struct PgKnowledgeStore {
    pool: PgPool,
}

impl PgKnowledgeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ChunkRow {
    id: Uuid,
    chunk_key: String,
    chunk_text: String,
    chunk_summary: String,
    category: String,
    applicable_patterns: Vec<String>,
    temperament_match: Vec<String>,
    time_commitment_max: Option<i32>,
    is_emergency_protocol: bool,
    embedding: serde_json::Value,
}

#[async_trait]
impl KnowledgeStore for PgKnowledgeStore {
    async fn chunks_for_agent(
        &self,
        agent: CoachAgent,
        model: &str,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        let rows = sqlx::query_as::<_, ChunkRow>(
            r#"
            SELECT id, chunk_key, chunk_text, chunk_summary, category,
                   applicable_patterns, temperament_match, time_commitment_max,
                   is_emergency_protocol, embedding
            FROM knowledge_chunks
            WHERE agent = $1
              AND embedding_model = $2
            ORDER BY chunk_key
            "#,
        )
        .bind(agent.as_str())
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let embedding = parse_embedding(&row.embedding);
                if embedding.is_empty() {
                    tracing::warn!(chunk_key = %row.chunk_key, "knowledge chunk without embedding skipped");
                    return None;
                }
                Some(KnowledgeChunk {
                    id: row.id,
                    agent,
                    chunk_key: row.chunk_key,
                    chunk_text: row.chunk_text,
                    chunk_summary: row.chunk_summary,
                    category: row.category,
                    applicable_patterns: row.applicable_patterns,
                    temperament_match: row.temperament_match,
                    time_commitment_max: row.time_commitment_max,
                    is_emergency_protocol: row.is_emergency_protocol,
                    embedding,
                })
            })
            .collect())
    }

    async fn upsert_chunks(
        &self,
        chunks: &[KnowledgeChunk],
        model: &str,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO knowledge_chunks (
                    id, agent, chunk_key, chunk_text, chunk_summary, category,
                    applicable_patterns, temperament_match, time_commitment_max,
                    is_emergency_protocol, embedding, embedding_model
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (agent, chunk_key)
                DO UPDATE SET chunk_text = EXCLUDED.chunk_text,
                              chunk_summary = EXCLUDED.chunk_summary,
                              category = EXCLUDED.category,
                              applicable_patterns = EXCLUDED.applicable_patterns,
                              temperament_match = EXCLUDED.temperament_match,
                              time_commitment_max = EXCLUDED.time_commitment_max,
                              is_emergency_protocol = EXCLUDED.is_emergency_protocol,
                              embedding = EXCLUDED.embedding,
                              embedding_model = EXCLUDED.embedding_model,
                              updated_at = NOW()
                "#,
            )
            .bind(chunk.id)
            .bind(chunk.agent.as_str())
            .bind(&chunk.chunk_key)
            .bind(&chunk.chunk_text)
            .bind(&chunk.chunk_summary)
            .bind(&chunk.category)
            .bind(&chunk.applicable_patterns)
            .bind(&chunk.temperament_match)
            .bind(chunk.time_commitment_max)
            .bind(chunk.is_emergency_protocol)
            .bind(serde_json::json!(chunk.embedding))
            .bind(model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }
}

/// Hybrid semantic + keyword search over an agent's knowledge chunks.
pub struct KnowledgeRetriever {
    store: Arc<dyn KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
    policy: FailurePolicy,
}

impl KnowledgeRetriever {
    pub fn new(store: Arc<dyn KnowledgeStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            policy: defaults::KNOWLEDGE_RETRIEVAL,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn model(&self) -> &str {
        self.embedder.model()
    }

    /// Ranked chunks for `query`. Under the default fail-open policy an
    /// embedding or store failure yields an empty result.
    pub async fn search(
        &self,
        query: &str,
        agent: CoachAgent,
        options: &RankOptions,
    ) -> Result<Vec<RetrievedChunk>, KnowledgeError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let result = self.search_inner(query, agent, options).await;
        self.policy
            .apply("knowledge_retrieval", result, Vec::new())
    }

    async fn search_inner(
        &self,
        query: &str,
        agent: CoachAgent,
        options: &RankOptions,
    ) -> Result<Vec<RetrievedChunk>, KnowledgeError> {
        let query_embedding = self.embedder.embed(query).await?;
        let chunks = self
            .store
            .chunks_for_agent(agent, self.embedder.model())
            .await?;
        let results = rank_chunks(query, &query_embedding, &chunks, options);
        tracing::debug!(
            agent = agent.as_str(),
            candidates = chunks.len(),
            results = results.len(),
            "knowledge search"
        );
        Ok(results)
    }

    /// Embed and store chunks for one agent. Validation happens up front so
    /// a bad chunk never leaves a partially ingested batch behind.
    pub async fn ingest(
        &self,
        agent: CoachAgent,
        inputs: Vec<KnowledgeChunkInput>,
    ) -> Result<usize, KnowledgeError> {
        for (index, input) in inputs.iter().enumerate() {
            input.validate(index)?;
        }

        let mut chunks = Vec::with_capacity(inputs.len());
        let mut pending = inputs.into_iter().peekable();
        while pending.peek().is_some() {
            let batch: Vec<KnowledgeChunkInput> =
                pending.by_ref().take(EMBEDDING_BATCH_SIZE).collect();
            let texts: Vec<String> = batch.iter().map(KnowledgeChunkInput::embedding_text).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(UpstreamError::Payload {
                    service: "embeddings",
                    message: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                }
                .into());
            }
            chunks.extend(
                batch
                    .into_iter()
                    .zip(vectors)
                    .map(|(input, vector)| input.into_chunk(agent, vector)),
            );
        }

        let written = self
            .store
            .upsert_chunks(&chunks, self.embedder.model())
            .await?;
        tracing::info!(agent = agent.as_str(), written, model = self.embedder.model(), "knowledge chunks ingested");
        Ok(written)
    }
}
