use axum::{
    extract::{Path, State},
    Json,
};

use crate::error::AppResult;
use crate::models::award::UserBadge;
use crate::AppState;

/// `GET /api/users/:user_id/awards` (spec.md §3, §6): the badges a user has
/// been granted so far, oldest first.
pub async fn list_awards(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<UserBadge>>> {
    let awards = state.repo.list_awards(&user_id).await?;
    Ok(Json(awards))
}
