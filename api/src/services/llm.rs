use async_trait::async_trait;
use mio_core::prompt::Prompt;
use serde::{Deserialize, Serialize};

use super::{UpstreamError, check_status};
use crate::config::LlmConfig;

const SERVICE: &str = "anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Prompt-completion call: system + user prompt in, generated text out.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError>;
}

pub struct AnthropicClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(http: reqwest::Client, config: &LlmConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/v1/messages", config.base_url.as_str().trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Concatenate the text blocks of a Messages API response.
fn extract_text(response: MessagesResponse) -> Result<String, UpstreamError> {
    let text: String = response
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("\n");

    let text = text.trim();
    if text.is_empty() {
        return Err(UpstreamError::Payload {
            service: SERVICE,
            message: "response contained no text blocks".to_string(),
        });
    }
    Ok(text.to_string())
}

#[async_trait]
impl CompletionClient for AnthropicClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, UpstreamError> {
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: &prompt.system,
            messages: vec![Message {
                role: "user",
                content: &prompt.user,
            }],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                service: SERVICE,
                source,
            })?;

        let parsed: MessagesResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|err| UpstreamError::Payload {
                service: SERVICE,
                message: err.to_string(),
            })?;

        tracing::debug!(model = %self.model, "completion received");
        extract_text(parsed)
    }
}

/// Used when no LLM credentials are configured; every call fails so callers
/// take their fallback path.
pub struct DisabledCompletionClient;

#[async_trait]
impl CompletionClient for DisabledCompletionClient {
    async fn complete(&self, _prompt: &Prompt) -> Result<String, UpstreamError> {
        Err(UpstreamError::NotConfigured { service: SERVICE })
    }
}
