use std::sync::Arc;

use sqlx::PgPool;

use crate::dispatch::FeedbackDispatcher;
use crate::services::chat::ChatService;
use crate::services::knowledge::KnowledgeRetriever;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    /// SHA-256 hex of `MIO_SERVICE_KEY`
    pub service_key_hash: Arc<str>,
    pub min_similarity: f64,
    pub dispatcher: Arc<FeedbackDispatcher>,
    pub chat: Arc<ChatService>,
    pub retriever: Arc<KnowledgeRetriever>,
}
