//! Ingress authentication: a single bearer API key shared by every caller.
//! Per-user auth/authorization is out of scope for the core engine, but the
//! ingress surface still needs something gating it.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::error::AppError;
use crate::AppState;

pub async fn require_api_key(
    State(state): State<AppState>,
    header: Option<TypedHeader<Authorization<Bearer>>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(TypedHeader(Authorization(bearer))) = header else {
        return Err(AppError::Unauthorized);
    };
    if bearer.token() != state.config.api_key {
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(req).await)
}
