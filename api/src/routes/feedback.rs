use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use mio_core::feedback::{SectionFeedbackRequest, SectionFeedbackResponse};

use crate::auth::ServiceAuth;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/feedback/section", post(create_section_feedback))
}

/// Generate feedback for a completed practice section
///
/// Rolls a reward tier from the user's history, grounds the message in the
/// knowledge base and stores it with an in-app notification and push.
/// Repeating the call for the same user, section and date returns the stored
/// message (200) instead of creating a new one (201).
#[utoipa::path(
    post,
    path = "/v1/feedback/section",
    request_body = SectionFeedbackRequest,
    responses(
        (status = 201, description = "Feedback generated", body = SectionFeedbackResponse),
        (status = 200, description = "Feedback already existed", body = SectionFeedbackResponse),
        (status = 400, description = "Validation failed", body = mio_core::error::ApiError),
        (status = 401, description = "Unauthorized", body = mio_core::error::ApiError),
        (status = 404, description = "Profile or practice submission not found", body = mio_core::error::ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "feedback"
)]
pub async fn create_section_feedback(
    _auth: ServiceAuth,
    State(state): State<AppState>,
    Json(req): Json<SectionFeedbackRequest>,
) -> Result<(StatusCode, Json<SectionFeedbackResponse>), AppError> {
    let outcome = state.dispatcher.dispatch(&req).await?;
    let status = if outcome.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(SectionFeedbackResponse::from_event(
            &outcome.event,
            outcome.duplicate,
        )),
    ))
}
