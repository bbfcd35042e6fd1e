use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use mio_core::policy::defaults;
use mio_core::reward::RewardRoller;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AppConfig, CacheBackend, EmbeddingConfig};
use crate::dispatch::FeedbackDispatcher;
use crate::services::cache::{
    CacheService, MemoryResponseCache, PgResponseCache, ResponseCache, sweep_expired,
};
use crate::services::chat::ChatService;
use crate::services::embedding::{Embedder, HashingEmbedder, OpenAiEmbedder};
use crate::services::knowledge::{KnowledgeRetriever, PgKnowledgeStore};
use crate::services::llm::{AnthropicClient, CompletionClient, DisabledCompletionClient};
use crate::services::push::{DisabledPushSender, PushSender, RelayPushSender};
use crate::services::store::PgFeedbackStore;

mod auth;
mod config;
mod dispatch;
mod error;
mod middleware;
mod routes;
mod services;
mod state;
#[cfg(test)]
mod testing;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Mind Insurance Feedback API",
        version = "0.1.0",
        description = "Section feedback with variable rewards, coaching chat and knowledge retrieval for the PROTECT practice."
    ),
    paths(
        routes::health::health_check,
        routes::feedback::create_section_feedback,
        routes::chat::chat,
        routes::knowledge::search_knowledge,
        routes::knowledge::ingest_chunks,
    ),
    components(schemas(
        HealthResponse,
        mio_core::error::ApiError,
        mio_core::feedback::PracticeSection,
        mio_core::feedback::SectionFeedbackRequest,
        mio_core::feedback::SectionFeedbackResponse,
        mio_core::reward::RewardTier,
        mio_core::retrieval::CoachAgent,
        mio_core::retrieval::ChunkFilters,
        mio_core::retrieval::RetrievedChunk,
        services::chat::ChatRequest,
        services::chat::ChatReply,
        services::knowledge::KnowledgeChunkInput,
        routes::knowledge::KnowledgeSearchRequest,
        routes::knowledge::KnowledgeSearchResponse,
        routes::knowledge::IngestChunksRequest,
        routes::knowledge::IngestChunksResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub embedding_model: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mio_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration, refusing to start");
            std::process::exit(1);
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let app_state = build_state(&config, pool);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::feedback::router().layer(middleware::rate_limit::feedback_layer()))
        .merge(routes::chat::router().layer(middleware::rate_limit::chat_layer()))
        .merge(routes::knowledge::router().layer(middleware::rate_limit::knowledge_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer(&config.cors_origins)),
        )
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("MIO feedback API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}

/// Wire every collaborator from configuration. Missing provider credentials
/// select the local stand-ins so the service still starts.
fn build_state(config: &AppConfig, pool: sqlx::PgPool) -> state::AppState {
    let http = services::http_client(config.http_timeout);

    let llm: Arc<dyn CompletionClient> = match &config.llm {
        Some(llm) => Arc::new(AnthropicClient::new(http.clone(), llm)),
        None => {
            tracing::warn!("ANTHROPIC_API_KEY not set, feedback and chat will use fallback text");
            Arc::new(DisabledCompletionClient)
        }
    };

    let embedder: Arc<dyn Embedder> = match &config.embedding {
        EmbeddingConfig::OpenAi {
            api_key,
            base_url,
            model,
            dimensions,
        } => Arc::new(OpenAiEmbedder::new(
            http.clone(),
            base_url,
            api_key.clone(),
            model.clone(),
            *dimensions,
        )),
        EmbeddingConfig::Hashing { dimensions } => Arc::new(HashingEmbedder::new(*dimensions)),
    };
    tracing::info!(
        model = embedder.model(),
        dimensions = embedder.dimensions(),
        "embedding provider selected"
    );

    let push: Arc<dyn PushSender> = match &config.push_relay {
        Some(relay) => Arc::new(RelayPushSender::new(http.clone(), relay)),
        None => Arc::new(DisabledPushSender),
    };

    let cache_backend: Arc<dyn ResponseCache> = match config.cache_backend {
        CacheBackend::Postgres => Arc::new(PgResponseCache::new(pool.clone())),
        CacheBackend::Memory => Arc::new(MemoryResponseCache::new()),
    };
    spawn_cache_sweeper(cache_backend.clone());
    let cache = Arc::new(CacheService::new(
        cache_backend,
        defaults::RESPONSE_CACHE,
        config.cache_ttl_seconds,
    ));

    let retriever = Arc::new(KnowledgeRetriever::new(
        Arc::new(PgKnowledgeStore::new(pool.clone())),
        embedder,
    ));

    let dispatcher = FeedbackDispatcher::new(
        Arc::new(PgFeedbackStore::new(pool.clone())),
        llm.clone(),
        retriever.clone(),
        push,
        RewardRoller::new(config.reward_table.clone(), config.reward_config.clone()),
    )
    .with_min_pattern_rows(config.min_pattern_rows)
    .with_min_similarity(config.min_similarity);

    let chat = ChatService::new(cache, retriever.clone(), llm, config.min_similarity);

    state::AppState {
        db: pool,
        service_key_hash: auth::hash_token(&config.service_key).into(),
        min_similarity: config.min_similarity,
        dispatcher: Arc::new(dispatcher),
        chat: Arc::new(chat),
        retriever,
    }
}

fn spawn_cache_sweeper(cache: Arc<dyn ResponseCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let purged = sweep_expired(cache.as_ref(), defaults::RESPONSE_CACHE).await;
            if purged > 0 {
                tracing::debug!(purged, "expired cache entries purged");
            }
        }
    });
}
