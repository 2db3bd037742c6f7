use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A named class of events with a descriptive (JSON-schema-shaped) payload
/// descriptor. Identity is immutable once created; `schema` may be updated
/// but existing events are never re-validated against it (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventType {
    pub id: Uuid,
    pub name: String,
    pub schema: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
