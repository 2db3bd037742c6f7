//! The event selector (spec.md §4.4): resolves an `event` name to an
//! `EventType`, pulls the user's events of that type from the active
//! time-window scope, and retains those whose payload satisfies the
//! predicate leaves. Reduces to `count` if present, and dispatches to an
//! embedded operator if present.

use serde_json::Value;

use crate::models::event::Event;
use crate::repository::Repository;

use super::context::EvalContext;
use super::error::EngineError;
use super::predicate;
use super::tree::Selector;

pub struct SelectionOutcome {
    pub events: Vec<Event>,
    pub metadata: Value,
}

pub async fn select(
    selector: &Selector,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<SelectionOutcome, EngineError> {
    let event_type = repo
        .lookup_event_type_by_name(&selector.event)
        .await
        .map_err(|e| EngineError::storage(path, e.to_string()))?
        .ok_or_else(|| EngineError::unresolved_event_type(path, selector.event.clone()))?;

    let events = repo
        .query_events(
            &ctx.user,
            Some(std::slice::from_ref(&event_type.id)),
            ctx.window_lower,
            ctx.window_upper,
        )
        .await
        .map_err(|e| EngineError::storage(path, e.to_string()))?;

    let total_count = events.len();
    let matched: Vec<Event> = events
        .into_iter()
        .filter(|e| !(ctx.exclude_weekends && super::period::is_weekend(e.occurred_at)))
        .filter(|e| {
            selector.body.predicates.iter().all(|fp| {
                let field = predicate::resolve_field(&e.payload, e.occurred_at, &fp.path);
                predicate::matches_all(field.as_deref(), &fp.ops)
            })
        })
        .collect();

    let metadata = serde_json::json!({
        "event": selector.event,
        "matched_count": matched.len(),
        "total_count": total_count,
    });

    Ok(SelectionOutcome {
        events: matched,
        metadata,
    })
}
