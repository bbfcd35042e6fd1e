use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use mio_core::retrieval::{ChunkFilters, CoachAgent, RankOptions, RetrievedChunk, clamp_limit};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::ServiceAuth;
use crate::error::AppError;
use crate::services::knowledge::KnowledgeChunkInput;
use crate::state::AppState;

const MAX_INGEST_CHUNKS: usize = 1_000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/knowledge/search", post(search_knowledge))
        .route("/v1/knowledge/chunks", post(ingest_chunks))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct KnowledgeSearchRequest {
    pub query: String,
    pub agent: CoachAgent,
    /// Maximum results, 1..=20 (default 5)
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: ChunkFilters,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct KnowledgeSearchResponse {
    pub results: Vec<RetrievedChunk>,
    pub embedding_model: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestChunksRequest {
    pub agent: CoachAgent,
    pub chunks: Vec<KnowledgeChunkInput>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestChunksResponse {
    pub written: usize,
    pub embedding_model: String,
}

/// Hybrid semantic + keyword search over an agent's knowledge base
///
/// Embedding failures yield an empty result rather than an error.
#[utoipa::path(
    post,
    path = "/v1/knowledge/search",
    request_body = KnowledgeSearchRequest,
    responses(
        (status = 200, description = "Ranked chunks", body = KnowledgeSearchResponse),
        (status = 400, description = "Validation failed", body = mio_core::error::ApiError),
        (status = 401, description = "Unauthorized", body = mio_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "knowledge"
)]
pub async fn search_knowledge(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(req): Json<KnowledgeSearchRequest>,
) -> Result<Json<KnowledgeSearchResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(AppError::validation("query", "query must not be empty"));
    }

    let options = RankOptions {
        limit: clamp_limit(req.limit),
        min_similarity: state.min_similarity,
        filters: req.filters,
    };
    let results = state
        .retriever
        .search(req.query.trim(), req.agent, &options)
        .await?;

    Ok(Json(KnowledgeSearchResponse {
        results,
        embedding_model: state.retriever.model().to_string(),
    }))
}

/// Embed and store knowledge chunks for an agent
///
/// Chunks are replaced by `(agent, chunk_key)`. Provider failures surface
/// as 502 so the operator can retry the batch.
#[utoipa::path(
    post,
    path = "/v1/knowledge/chunks",
    request_body = IngestChunksRequest,
    responses(
        (status = 200, description = "Chunks stored", body = IngestChunksResponse),
        (status = 400, description = "Validation failed", body = mio_core::error::ApiError),
        (status = 401, description = "Unauthorized", body = mio_core::error::ApiError),
        (status = 502, description = "Embedding provider unavailable", body = mio_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "knowledge"
)]
pub async fn ingest_chunks(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(req): Json<IngestChunksRequest>,
) -> Result<Json<IngestChunksResponse>, AppError> {
    if req.chunks.is_empty() {
        return Err(AppError::validation("chunks", "at least one chunk is required"));
    }
    if req.chunks.len() > MAX_INGEST_CHUNKS {
        return Err(AppError::validation(
            "chunks",
            format!("at most {MAX_INGEST_CHUNKS} chunks per request"),
        ));
    }

    let written = state.retriever.ingest(req.agent, req.chunks).await?;
    Ok(Json(IngestChunksResponse {
        written,
        embedding_model: state.retriever.model().to_string(),
    }))
}
