use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};

use crate::auth::ServiceAuth;
use crate::error::AppError;
use crate::services::chat::{ChatReply, ChatRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/chat", post(chat))
}

/// Ask one of the coaching agents a question
///
/// Identical messages from the same user to the same agent are answered from
/// the response cache until the entry expires.
#[utoipa::path(
    post,
    path = "/v1/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Agent reply", body = ChatReply),
        (status = 400, description = "Validation failed", body = mio_core::error::ApiError),
        (status = 401, description = "Unauthorized", body = mio_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "chat"
)]
pub async fn chat(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let reply = state.chat.respond(&req).await?;
    Ok(Json(reply))
}
