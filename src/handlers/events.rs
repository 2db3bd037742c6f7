use axum::{extract::State, Json};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::event::{SubmitEventRequest, SubmitEventResponse};
use crate::AppState;

/// `POST /api/events` (spec.md §6): appends the event, then re-evaluates
/// every active badge the event type could affect for this user.
pub async fn submit_event(
    State(state): State<AppState>,
    Json(request): Json<SubmitEventRequest>,
) -> AppResult<Json<SubmitEventResponse>> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let response = state.orchestrator.submit(request).await?;
    Ok(Json(response))
}
