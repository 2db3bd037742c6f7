use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The 1-to-1 child of `Badge` holding its `flow_definition` (spec.md §3).
/// `version` increments on replacement; previously awarded badges are never
/// revoked when criteria change (spec.md §9, Open Question: revocation
/// policy — decided: keep prior awards).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BadgeCriteria {
    pub badge_id: Uuid,
    pub version: i32,
    pub flow_definition: serde_json::Value,
    /// Event-type names referenced anywhere in `flow_definition`, memoized
    /// by a one-pass walk at decode time (spec.md §9). Empty means
    /// extraction was inconclusive (e.g. a standalone `$sequence`/`$duration`
    /// whose members could not be statically enumerated) and ingestion
    /// should conservatively treat the badge as a candidate for every event.
    pub event_type_refs: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BadgeCriteria {
    /// A badge is a candidate for re-evaluation against an incoming event of
    /// `event_type_name` if its criteria references that type, or if
    /// reference extraction could not determine a precise set.
    pub fn references(&self, event_type_name: &str) -> bool {
        self.event_type_refs.is_empty()
            || self
                .event_type_refs
                .iter()
                .any(|name| name == event_type_name)
    }
}
