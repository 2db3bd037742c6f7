//! The abstract storage contract the core requires (spec.md §4.1). The core
//! never assumes SQL; any store that satisfies this trait suffices. All
//! queries are read-your-writes consistent within a single ingestion call.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::award::UserBadge;
use crate::models::badge::Badge;
use crate::models::criteria::BadgeCriteria;
use crate::models::event::Event;
use crate::models::event_type::EventType;

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RepoError(pub String);

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        Self(e.to_string())
    }
}

pub struct NewEvent {
    pub user_id: String,
    pub event_type_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

#[async_trait]
pub trait Repository: Send + Sync {
    async fn lookup_event_type_by_name(&self, name: &str) -> Result<Option<EventType>, RepoError>;
    async fn lookup_event_type_by_id(&self, id: Uuid) -> Result<Option<EventType>, RepoError>;

    async fn list_active_badges(&self) -> Result<Vec<Badge>, RepoError>;
    async fn load_criteria(&self, badge_id: Uuid) -> Result<Option<BadgeCriteria>, RepoError>;

    async fn append_event(&self, event: NewEvent) -> Result<Event, RepoError>;

    /// Events for `user_id`, optionally restricted to `event_type_ids` and a
    /// half-open `[lower, upper)` occurrence window, ordered by occurrence
    /// ascending then id ascending (spec.md §4.1).
    async fn query_events(
        &self,
        user_id: &str,
        event_type_ids: Option<&[Uuid]>,
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, RepoError>;

    async fn has_award(&self, user_id: &str, badge_id: Uuid) -> Result<bool, RepoError>;

    async fn list_awards(&self, user_id: &str) -> Result<Vec<UserBadge>, RepoError>;

    /// Succeeds exactly once per `(user_id, badge_id)` pair. Returns `true`
    /// if a new award row was created, `false` if one already existed
    /// (idempotent — spec.md §3, §7).
    async fn record_award(
        &self,
        user_id: &str,
        badge_id: Uuid,
        metadata: Value,
        awarded_at: DateTime<Utc>,
    ) -> Result<bool, RepoError>;
}
