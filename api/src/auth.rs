use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::state::AppState;

/// SHA-256 hex digest of a bearer token; only the digest is kept in memory
/// after startup.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Caller presented the shared service key in `Authorization: Bearer <key>`.
///
/// The `/v1` routes are called by the app backend and by operators, never by
/// end users directly, so a single shared key is the whole auth model.
#[derive(Debug, Clone, Copy)]
pub struct ServiceAuth;

impl FromRequestParts<AppState> for ServiceAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some(
                    "Include 'Authorization: Bearer <MIO_SERVICE_KEY>' header.".to_string(),
                ),
            })?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized {
                message: "Authorization header must use Bearer scheme".to_string(),
                docs_hint: Some("Format: 'Authorization: Bearer <token>'".to_string()),
            })?;

        if hash_token(token.trim()) != *state.service_key_hash {
            tracing::warn!("rejected request with invalid service key");
            return Err(AppError::Unauthorized {
                message: "Invalid service key".to_string(),
                docs_hint: None,
            });
        }

        Ok(ServiceAuth)
    }
}
