//! `$duration` (spec.md §4.5.4): pairs each `startEvent` occurrence with the
//! earliest unconsumed `startEvent`-matching `endEvent` occurrence sharing
//! `matchProperty`, converts the elapsed time to `unit`, and either counts
//! qualifying pairs (`duration.count` present) or requires every formed pair
//! to satisfy `duration` (all-quantified mode).

use std::collections::HashMap;

use crate::engine::context::EvalContext;
use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::predicate;
use crate::engine::selector;
use crate::engine::tree::DurationParams;
use crate::models::event::Event;
use crate::repository::Repository;

pub async fn evaluate(
    params: &DurationParams,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let starts = selector::select(&params.start_event, ctx, repo, &child(path, "startEvent")).await?;
    let ends = selector::select(&params.end_event, ctx, repo, &child(path, "endEvent")).await?;

    let mut start_events = starts.events;
    start_events.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));

    let mut ends_by_key: HashMap<String, Vec<Event>> = HashMap::new();
    for end in ends.events {
        let key = match_key(&end, &params.match_property);
        ends_by_key.entry(key).or_default().push(end);
    }
    for bucket in ends_by_key.values_mut() {
        bucket.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
    }
    let mut cursors: HashMap<String, usize> = HashMap::new();

    let mut durations = Vec::new();
    for start in &start_events {
        let key = match_key(start, &params.match_property);
        let Some(bucket) = ends_by_key.get(&key) else { continue };
        let cursor = cursors.entry(key.clone()).or_insert(0);
        let mut found = None;
        for (i, end) in bucket.iter().enumerate().skip(*cursor) {
            if end.occurred_at >= start.occurred_at {
                found = Some(i);
                break;
            }
        }
        if let Some(i) = found {
            let end = &bucket[i];
            let seconds = (end.occurred_at - start.occurred_at).num_seconds() as f64;
            let converted = params.unit.from_seconds(seconds);
            durations.push(converted);
            *cursor = i + 1;
        }
    }

    let total_pairs = durations.len();
    let qualifying: Vec<&f64> = durations
        .iter()
        .filter(|d| predicate::matches_all(Some(&serde_json::json!(**d)), &params.duration_filter))
        .collect();

    let result = if let Some(count_ops) = &params.count {
        predicate::matches_all(Some(&serde_json::json!(qualifying.len())), count_ops)
    } else {
        total_pairs > 0 && qualifying.len() == total_pairs
    };

    let metadata = serde_json::json!({
        "durations": durations,
        "pair_count": total_pairs,
        "qualifying_pair_count": qualifying.len(),
    });

    Ok(EvalOutcome::new(result, metadata))
}

fn match_key(event: &Event, property: &str) -> String {
    predicate::resolve_field(&event.payload, event.occurred_at, property)
        .map(|v| v.to_string())
        .unwrap_or_default()
}

fn child(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}/{segment}")
    }
}
