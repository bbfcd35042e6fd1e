use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mio_core::error::{self, ApiError};

use crate::dispatch::DispatchError;
use crate::services::StoreError;
use crate::services::chat::ChatError;
use crate::services::knowledge::KnowledgeError;

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Missing or wrong service key (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Referenced record does not exist (404)
    NotFound { message: String },
    /// Third-party service failed where no local fallback exists (502)
    Upstream(String),
    /// Server misconfiguration detected at request time (500)
    Configuration(String),
    /// Database error (500)
    Database(sqlx::Error),
    /// Internal error (500)
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: Some(field.into()),
            received: None,
            docs_hint: None,
        }
    }
}

fn body(code: &str, message: String, request_id: String) -> ApiError {
    ApiError {
        error: code.to_string(),
        message,
        field: None,
        received: None,
        request_id,
        docs_hint: None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    docs_hint,
                    ..body(error::codes::UNAUTHORIZED, message, request_id)
                },
            ),
            AppError::NotFound { message } => (
                StatusCode::NOT_FOUND,
                body(error::codes::NOT_FOUND, message, request_id),
            ),
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    body(error::codes::UPSTREAM_UNAVAILABLE, msg, request_id),
                )
            }
            AppError::Configuration(msg) => {
                tracing::error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(
                        error::codes::CONFIGURATION_ERROR,
                        "The service is misconfigured".to_string(),
                        request_id,
                    ),
                )
            }
            AppError::Database(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        request_id,
                    ),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    body(
                        error::codes::INTERNAL_ERROR,
                        "An internal error occurred".to_string(),
                        request_id,
                    ),
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(err) => AppError::Database(err),
            StoreError::Malformed(msg) => AppError::Internal(msg),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Validation { field, message } => AppError::validation(field, message),
            DispatchError::NotFound { .. } => AppError::NotFound {
                message: err.to_string(),
            },
            DispatchError::Store(err) => err.into(),
            DispatchError::Reward(err) => AppError::Configuration(err.to_string()),
            DispatchError::Knowledge(err) => err.into(),
            DispatchError::Upstream(err) => AppError::Upstream(err.to_string()),
        }
    }
}

impl From<KnowledgeError> for AppError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::Validation { field, message } => AppError::validation(field, message),
            KnowledgeError::Upstream(err) => AppError::Upstream(err.to_string()),
            KnowledgeError::Store(err) => err.into(),
        }
    }
}

impl From<ChatError> for AppError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Validation { field, message } => AppError::validation(field, message),
            ChatError::Cache(err) => AppError::Upstream(err.to_string()),
            ChatError::Knowledge(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_map_to_status_codes() {
        let not_found: AppError = DispatchError::NotFound {
            what: "profile",
            user_id: "u1".to_string(),
        }
        .into();
        assert_eq!(not_found.into_response().status(), StatusCode::NOT_FOUND);

        let validation: AppError = DispatchError::Validation {
            field: "user_id",
            message: "must not be empty".to_string(),
        }
        .into();
        assert_eq!(validation.into_response().status(), StatusCode::BAD_REQUEST);

        let reward: AppError =
            DispatchError::Reward(mio_core::reward::RewardError::InvalidConfiguration(
                "empty".to_string(),
            ))
            .into();
        assert_eq!(
            reward.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_failures_are_bad_gateway() {
        let err: AppError = KnowledgeError::Upstream(crate::services::UpstreamError::NotConfigured {
            service: "openai-embeddings",
        })
        .into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }
}
