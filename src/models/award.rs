use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The fact that `badge_id` has been granted to `user_id`. `(user_id,
/// badge_id)` is unique — at-most-one award per pair (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBadge {
    pub user_id: String,
    pub badge_id: Uuid,
    pub awarded_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}
