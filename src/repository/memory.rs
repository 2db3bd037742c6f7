//! An in-memory `Repository` used by engine unit tests so the criteria
//! interpreter can be exercised deterministically without a live Postgres
//! instance (spec.md §5 — "the criteria interpreter itself performs no I/O
//! beyond [repository] calls and is pure given a fixed event list and
//! clock").

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::award::UserBadge;
use crate::models::badge::Badge;
use crate::models::criteria::BadgeCriteria;
use crate::models::event::Event;
use crate::models::event_type::EventType;

use super::{NewEvent, RepoError, Repository};

#[derive(Default)]
pub struct InMemoryRepository {
    inner: Mutex<State>,
}

#[derive(Default)]
struct State {
    event_types: Vec<EventType>,
    events: Vec<Event>,
    next_event_id: i64,
    badges: Vec<Badge>,
    criteria: HashMap<Uuid, BadgeCriteria>,
    awards: Vec<UserBadge>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(State {
                next_event_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn register_event_type(&self, name: &str) -> Uuid {
        let mut state = self.inner.lock().unwrap();
        if let Some(et) = state.event_types.iter().find(|e| e.name == name) {
            return et.id;
        }
        let id = Uuid::new_v4();
        state.event_types.push(EventType {
            id,
            name: name.to_string(),
            schema: Value::Object(Default::default()),
            created_at: Utc::now(),
        });
        id
    }

    /// Inserts an event directly (bypassing `appendEvent`'s id allocation
    /// path) — convenient for seeding fixed test scenarios.
    pub fn seed_event(&self, user_id: &str, event_type_name: &str, occurred_at: DateTime<Utc>, payload: Value) {
        let type_id = self.register_event_type(event_type_name);
        let mut state = self.inner.lock().unwrap();
        let id = state.next_event_id;
        state.next_event_id += 1;
        state.events.push(Event {
            id,
            user_id: user_id.to_string(),
            event_type_id: type_id,
            occurred_at,
            payload,
        });
    }

    pub fn register_badge(&self, badge: Badge, criteria: BadgeCriteria) {
        let mut state = self.inner.lock().unwrap();
        state.criteria.insert(badge.id, criteria);
        state.badges.push(badge);
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn lookup_event_type_by_name(&self, name: &str) -> Result<Option<EventType>, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state.event_types.iter().find(|e| e.name == name).cloned())
    }

    async fn lookup_event_type_by_id(&self, id: Uuid) -> Result<Option<EventType>, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state.event_types.iter().find(|e| e.id == id).cloned())
    }

    async fn list_active_badges(&self) -> Result<Vec<Badge>, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state.badges.iter().filter(|b| b.is_active).cloned().collect())
    }

    async fn load_criteria(&self, badge_id: Uuid) -> Result<Option<BadgeCriteria>, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state.criteria.get(&badge_id).cloned())
    }

    async fn append_event(&self, event: NewEvent) -> Result<Event, RepoError> {
        let mut state = self.inner.lock().unwrap();
        let id = state.next_event_id;
        state.next_event_id += 1;
        let row = Event {
            id,
            user_id: event.user_id,
            event_type_id: event.event_type_id,
            occurred_at: event.occurred_at,
            payload: event.payload,
        };
        state.events.push(row.clone());
        Ok(row)
    }

    async fn query_events(
        &self,
        user_id: &str,
        event_type_ids: Option<&[Uuid]>,
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, RepoError> {
        let state = self.inner.lock().unwrap();
        let mut matched: Vec<Event> = state
            .events
            .iter()
            .filter(|e| e.user_id == user_id)
            .filter(|e| event_type_ids.map(|ids| ids.contains(&e.event_type_id)).unwrap_or(true))
            .filter(|e| lower.map(|l| e.occurred_at >= l).unwrap_or(true))
            .filter(|e| upper.map(|u| e.occurred_at < u).unwrap_or(true))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        Ok(matched)
    }

    async fn has_award(&self, user_id: &str, badge_id: Uuid) -> Result<bool, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .awards
            .iter()
            .any(|a| a.user_id == user_id && a.badge_id == badge_id))
    }

    async fn list_awards(&self, user_id: &str) -> Result<Vec<UserBadge>, RepoError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .awards
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn record_award(
        &self,
        user_id: &str,
        badge_id: Uuid,
        metadata: Value,
        awarded_at: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let mut state = self.inner.lock().unwrap();
        if state
            .awards
            .iter()
            .any(|a| a.user_id == user_id && a.badge_id == badge_id)
        {
            return Ok(false);
        }
        state.awards.push(UserBadge {
            user_id: user_id.to_string(),
            badge_id,
            awarded_at,
            metadata,
        });
        Ok(true)
    }
}
