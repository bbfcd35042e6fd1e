use async_trait::async_trait;
use serde::Serialize;

use super::{UpstreamError, check_status};
use crate::config::PushRelayConfig;

const SERVICE: &str = "push-relay";

/// A browser push endpoint registered by the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushSubscription {
    pub endpoint: String,
    /// `p256dh` / `auth` keys exactly as the browser reported them
    pub keys: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

/// Fire-and-forget notification delivery. Callers decide what a failure
/// means; delivery never blocks the main response.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &PushMessage,
    ) -> Result<(), UpstreamError>;
}

/// Hands messages to an HTTP relay that owns the VAPID keys and performs
/// the web-push encryption.
pub struct RelayPushSender {
    http: reqwest::Client,
    url: url::Url,
    api_key: Option<String>,
}

impl RelayPushSender {
    pub fn new(http: reqwest::Client, config: &PushRelayConfig) -> Self {
        Self {
            http,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    subscription: &'a PushSubscription,
    #[serde(flatten)]
    message: &'a PushMessage,
}

#[async_trait]
impl PushSender for RelayPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        message: &PushMessage,
    ) -> Result<(), UpstreamError> {
        let mut request = self.http.post(self.url.clone()).json(&RelayRequest {
            subscription,
            message,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                service: SERVICE,
                source,
            })?;
        check_status(SERVICE, response).await?;
        Ok(())
    }
}

/// No relay configured: drop the message.
pub struct DisabledPushSender;

#[async_trait]
impl PushSender for DisabledPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        _message: &PushMessage,
    ) -> Result<(), UpstreamError> {
        tracing::debug!(endpoint = %subscription.endpoint, "push relay disabled, message dropped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_request_flattens_message() {
        let subscription = PushSubscription {
            endpoint: "https://push.example/abc".to_string(),
            keys: serde_json::json!({"p256dh": "k", "auth": "a"}),
        };
        let message = PushMessage {
            title: "Feedback ready".to_string(),
            body: "Nice work".to_string(),
            data: serde_json::json!({"message_id": "m1"}),
        };
        let value = serde_json::to_value(RelayRequest {
            subscription: &subscription,
            message: &message,
        })
        .unwrap();
        assert_eq!(value["subscription"]["endpoint"], "https://push.example/abc");
        assert_eq!(value["title"], "Feedback ready");
        assert_eq!(value["data"]["message_id"], "m1");
    }
}
