use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::award::UserBadge;
use crate::models::badge::Badge;
use crate::models::criteria::BadgeCriteria;
use crate::models::event::Event;
use crate::models::event_type::EventType;

use super::{NewEvent, RepoError, Repository};

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn lookup_event_type_by_name(&self, name: &str) -> Result<Option<EventType>, RepoError> {
        let row = sqlx::query_as::<_, EventType>("SELECT * FROM event_types WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn lookup_event_type_by_id(&self, id: Uuid) -> Result<Option<EventType>, RepoError> {
        let row = sqlx::query_as::<_, EventType>("SELECT * FROM event_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn list_active_badges(&self) -> Result<Vec<Badge>, RepoError> {
        let rows = sqlx::query_as::<_, Badge>(
            "SELECT * FROM badges WHERE is_active = true ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn load_criteria(&self, badge_id: Uuid) -> Result<Option<BadgeCriteria>, RepoError> {
        let row = sqlx::query_as::<_, BadgeCriteria>(
            "SELECT * FROM badge_criteria WHERE badge_id = $1",
        )
        .bind(badge_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn append_event(&self, event: NewEvent) -> Result<Event, RepoError> {
        let row = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (user_id, event_type_id, occurred_at, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&event.user_id)
        .bind(event.event_type_id)
        .bind(event.occurred_at)
        .bind(&event.payload)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn query_events(
        &self,
        user_id: &str,
        event_type_ids: Option<&[Uuid]>,
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, RepoError> {
        let rows = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE user_id = $1
              AND ($2::uuid[] IS NULL OR event_type_id = ANY($2))
              AND ($3::timestamptz IS NULL OR occurred_at >= $3)
              AND ($4::timestamptz IS NULL OR occurred_at < $4)
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .bind(event_type_ids)
        .bind(lower)
        .bind(upper)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn has_award(&self, user_id: &str, badge_id: Uuid) -> Result<bool, RepoError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM user_badges WHERE user_id = $1 AND badge_id = $2)",
        )
        .bind(user_id)
        .bind(badge_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn list_awards(&self, user_id: &str) -> Result<Vec<UserBadge>, RepoError> {
        let rows = sqlx::query_as::<_, UserBadge>(
            "SELECT * FROM user_badges WHERE user_id = $1 ORDER BY awarded_at ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn record_award(
        &self,
        user_id: &str,
        badge_id: Uuid,
        metadata: Value,
        awarded_at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO user_badges (user_id, badge_id, awarded_at, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, badge_id) DO NOTHING
            RETURNING badge_id
            "#,
        )
        .bind(user_id)
        .bind(badge_id)
        .bind(awarded_at)
        .bind(&metadata)
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.is_some())
    }
}
