use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// An immutable, append-only record of a user action. `id` is a monotonic
/// identifier assigned at insert time; within equal `occurred_at` timestamps,
/// ordering falls back to `id` ascending (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Event {
    pub id: i64,
    pub user_id: String,
    pub event_type_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

/// `POST /api/events` request body (spec.md §6 — "Submit event").
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitEventRequest {
    pub event_type: String,
    #[validate(length(min = 1, message = "user_id must not be empty"))]
    pub user_id: String,
    #[serde(default = "default_payload")]
    pub payload: serde_json::Value,
    pub timestamp: Option<DateTime<Utc>>,
}

fn default_payload() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Serialize)]
pub struct SubmitEventResponse {
    pub event_id: i64,
    pub newly_awarded: Vec<crate::models::award::UserBadge>,
}
