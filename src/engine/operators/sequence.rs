//! `$sequence` (spec.md §4.5.5): tests whether the named event types occur,
//! for this user, in the given order. `requireStrict` rejects an
//! out-of-order occurrence of another tracked type between two sequence
//! steps; `maxGapSeconds` bounds the time between consecutive matched
//! steps. A violation restarts the attempt at the offending event if it can
//! itself begin the sequence.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::context::EvalContext;
use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::tree::SequenceParams;
use crate::models::event::Event;
use crate::repository::Repository;

pub async fn evaluate(
    params: &SequenceParams,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let mut type_ids = Vec::new();
    let mut name_of = HashMap::new();
    for name in &params.sequence {
        if name_of.values().any(|n: &String| n == name) {
            continue;
        }
        let event_type = repo
            .lookup_event_type_by_name(name)
            .await
            .map_err(|e| EngineError::storage(path, e.to_string()))?
            .ok_or_else(|| EngineError::unresolved_event_type(path, name.clone()))?;
        type_ids.push(event_type.id);
        name_of.insert(event_type.id, name.clone());
    }

    // Under `requireStrict`, an intervening event of *any* type — not just
    // another tracked sequence step — breaks an in-progress attempt
    // (spec.md §4.5.5, §8), so the scan needs to see the user's full event
    // history rather than just the sequence's own types.
    let mut pool = if params.require_strict {
        repo.query_events(&ctx.user, None, ctx.window_lower, ctx.window_upper)
            .await
    } else {
        repo.query_events(&ctx.user, Some(&type_ids), ctx.window_lower, ctx.window_upper)
            .await
    }
    .map_err(|e| EngineError::storage(path, e.to_string()))?;
    pool.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));

    let labels: Vec<&str> = pool
        .iter()
        .map(|e| name_of.get(&e.event_type_id).map(String::as_str).unwrap_or(""))
        .collect();

    let outcome = run_sequence(&pool, &labels, params);

    let metadata = serde_json::json!({
        "matched": outcome.0,
        "matched_event_ids": outcome.1,
        "sequence_length": params.sequence.len(),
    });

    Ok(EvalOutcome::new(outcome.0, metadata))
}

fn run_sequence(pool: &[Event], labels: &[&str], params: &SequenceParams) -> (bool, Vec<i64>) {
    let sequence = &params.sequence;
    let mut seq_idx = 0usize;
    let mut last_time: Option<DateTime<Utc>> = None;
    let mut matched_ids = Vec::new();

    for (event, label) in pool.iter().zip(labels.iter()) {
        if seq_idx >= sequence.len() {
            break;
        }
        let next_expected = sequence[seq_idx].as_str();

        if *label == next_expected {
            if let (Some(limit), Some(last)) = (params.max_gap_seconds, last_time) {
                let gap = (event.occurred_at - last).num_seconds() as f64;
                if gap > limit {
                    restart(&mut seq_idx, &mut matched_ids, &mut last_time, event, label, sequence);
                    continue;
                }
            }
            matched_ids.push(event.id);
            seq_idx += 1;
            last_time = Some(event.occurred_at);
            continue;
        }

        // `label` does not extend the in-progress attempt. Under
        // `requireStrict`, any such intervening event — of any type —
        // breaks the attempt outright (spec.md §4.5.5, §8); non-strict mode
        // simply skips it and keeps waiting for the next expected step.
        if params.require_strict && seq_idx > 0 {
            restart(&mut seq_idx, &mut matched_ids, &mut last_time, event, label, sequence);
        }
    }

    (seq_idx >= sequence.len(), matched_ids)
}

/// Resets an in-progress attempt, immediately restarting it at `event` if
/// `label` can itself begin the sequence.
fn restart(
    seq_idx: &mut usize,
    matched_ids: &mut Vec<i64>,
    last_time: &mut Option<DateTime<Utc>>,
    event: &Event,
    label: &str,
    sequence: &[String],
) {
    *seq_idx = 0;
    matched_ids.clear();
    *last_time = None;
    if label == sequence[0] {
        matched_ids.push(event.id);
        *seq_idx = 1;
        *last_time = Some(event.occurred_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::EvalContext;
    use crate::engine::tree::SequenceParams;
    use crate::repository::memory::InMemoryRepository;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use serde_json::json;

    #[tokio::test]
    async fn matches_when_events_occur_in_order() {
        let repo = InMemoryRepository::new();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap();
        let user = "user-1";

        repo.seed_event(user, "signup", now, json!({}));
        repo.seed_event(user, "first-login", now + ChronoDuration::hours(1), json!({}));
        repo.seed_event(user, "first-purchase", now + ChronoDuration::hours(2), json!({}));

        let ctx = EvalContext::new(user, now);
        let params = SequenceParams {
            sequence: vec!["signup".to_string(), "first-login".to_string(), "first-purchase".to_string()],
            max_gap_seconds: None,
            require_strict: false,
        };

        let outcome = evaluate(&params, &ctx, &repo, "").await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["matched"], json!(true));
    }

    #[tokio::test]
    async fn non_strict_mode_ignores_untracked_event_types() {
        let repo = InMemoryRepository::new();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap();
        let user = "user-1";

        repo.seed_event(user, "signup", now, json!({}));
        // "newsletter-opened" is not part of the tracked sequence at all, so
        // the non-strict pool never even fetches it.
        repo.seed_event(user, "newsletter-opened", now + ChronoDuration::minutes(30), json!({}));
        repo.seed_event(user, "first-login", now + ChronoDuration::hours(1), json!({}));

        let ctx = EvalContext::new(user, now);
        let params = SequenceParams {
            sequence: vec!["signup".to_string(), "first-login".to_string()],
            max_gap_seconds: None,
            require_strict: false,
        };

        let outcome = evaluate(&params, &ctx, &repo, "").await.unwrap();
        assert!(outcome.result);
    }

    /// The bug this test guards against: an intervening event of a type not
    /// named anywhere in `sequence` must still break a strict attempt
    /// (spec.md §4.5.5, §8) — it is not enough to reset only on mismatched
    /// *tracked* types.
    #[tokio::test]
    async fn strict_mode_breaks_on_untracked_intervening_event() {
        let repo = InMemoryRepository::new();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap();
        let user = "user-1";

        repo.seed_event(user, "signup", now, json!({}));
        repo.seed_event(user, "newsletter-opened", now + ChronoDuration::minutes(30), json!({}));
        repo.seed_event(user, "first-login", now + ChronoDuration::hours(1), json!({}));

        let ctx = EvalContext::new(user, now);
        let params = SequenceParams {
            sequence: vec!["signup".to_string(), "first-login".to_string()],
            max_gap_seconds: None,
            require_strict: true,
        };

        let outcome = evaluate(&params, &ctx, &repo, "").await.unwrap();
        assert!(!outcome.result);
    }

    #[tokio::test]
    async fn strict_mode_passes_with_no_intervening_events() {
        let repo = InMemoryRepository::new();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap();
        let user = "user-1";

        repo.seed_event(user, "signup", now, json!({}));
        repo.seed_event(user, "first-login", now + ChronoDuration::hours(1), json!({}));

        let ctx = EvalContext::new(user, now);
        let params = SequenceParams {
            sequence: vec!["signup".to_string(), "first-login".to_string()],
            max_gap_seconds: None,
            require_strict: true,
        };

        let outcome = evaluate(&params, &ctx, &repo, "").await.unwrap();
        assert!(outcome.result);
    }

    #[tokio::test]
    async fn max_gap_seconds_rejects_a_too_slow_second_step() {
        let repo = InMemoryRepository::new();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap();
        let user = "user-1";

        repo.seed_event(user, "signup", now, json!({}));
        repo.seed_event(user, "first-login", now + ChronoDuration::hours(2), json!({}));

        let ctx = EvalContext::new(user, now);
        let params = SequenceParams {
            sequence: vec!["signup".to_string(), "first-login".to_string()],
            max_gap_seconds: Some(3600.0),
            require_strict: false,
        };

        let outcome = evaluate(&params, &ctx, &repo, "").await.unwrap();
        assert!(!outcome.result);
    }
}
