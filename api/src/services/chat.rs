use std::sync::Arc;

use mio_core::cache::cache_key;
use mio_core::prompt::{chat_prompt, fallback_chat_reply};
use mio_core::retrieval::{CoachAgent, RankOptions, format_context};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::cache::{CacheError, CacheService};
use super::knowledge::{KnowledgeError, KnowledgeRetriever};
use super::llm::CompletionClient;

const CHAT_DISCRIMINATOR: &str = "chat";
const MAX_MESSAGE_CHARS: usize = 4_000;

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ChatRequest {
    pub user_id: String,
    pub agent: CoachAgent,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ChatReply {
    pub reply: String,
    /// Served from the response cache without calling the model
    pub cached: bool,
    pub knowledge_chunks: usize,
    /// Canned reply because the model was unavailable; never cached
    pub used_fallback: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("invalid chat request: {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
}

/// Cached, knowledge-grounded replies from one of the coaching agents.
pub struct ChatService {
    cache: Arc<CacheService>,
    retriever: Arc<KnowledgeRetriever>,
    llm: Arc<dyn CompletionClient>,
    min_similarity: f64,
}

impl ChatService {
    pub fn new(
        cache: Arc<CacheService>,
        retriever: Arc<KnowledgeRetriever>,
        llm: Arc<dyn CompletionClient>,
        min_similarity: f64,
    ) -> Self {
        Self {
            cache,
            retriever,
            llm,
            min_similarity,
        }
    }

    fn validate(request: &ChatRequest) -> Result<(), ChatError> {
        if request.user_id.trim().is_empty() {
            return Err(ChatError::Validation {
                field: "user_id",
                message: "must not be empty".to_string(),
            });
        }
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::Validation {
                field: "message",
                message: "must not be empty".to_string(),
            });
        }
        if message.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::Validation {
                field: "message",
                message: format!("must be at most {MAX_MESSAGE_CHARS} characters"),
            });
        }
        Ok(())
    }

    pub async fn respond(&self, request: &ChatRequest) -> Result<ChatReply, ChatError> {
        Self::validate(request)?;
        let message = request.message.trim();
        let key = cache_key(
            request.agent.as_str(),
            &request.user_id,
            CHAT_DISCRIMINATOR,
            message,
        );

        if let Some(reply) = self.cache.get(&key).await? {
            tracing::debug!(agent = request.agent.as_str(), "chat cache hit");
            return Ok(ChatReply {
                reply,
                cached: true,
                knowledge_chunks: 0,
                used_fallback: false,
            });
        }

        let options = RankOptions {
            min_similarity: self.min_similarity,
            ..RankOptions::default()
        };
        let chunks = self.retriever.search(message, request.agent, &options).await?;
        let knowledge = format_context(&chunks);
        let prompt = chat_prompt(request.agent, message, knowledge.as_deref());

        match self.llm.complete(&prompt).await {
            Ok(reply) if !reply.trim().is_empty() => {
                self.cache
                    .set(&key, &reply, self.cache.default_ttl_seconds())
                    .await?;
                Ok(ChatReply {
                    reply,
                    cached: false,
                    knowledge_chunks: chunks.len(),
                    used_fallback: false,
                })
            }
            Ok(_) => {
                tracing::warn!(agent = request.agent.as_str(), "chat completion was empty, using fallback reply");
                Ok(Self::fallback(request.agent, chunks.len()))
            }
            Err(err) => {
                tracing::warn!(agent = request.agent.as_str(), error = %err, "chat completion failed, using fallback reply");
                Ok(Self::fallback(request.agent, chunks.len()))
            }
        }
    }

    fn fallback(agent: CoachAgent, knowledge_chunks: usize) -> ChatReply {
        ChatReply {
            reply: fallback_chat_reply(agent),
            cached: false,
            knowledge_chunks,
            used_fallback: true,
        }
    }
}
