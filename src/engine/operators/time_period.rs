//! `$timePeriod` (spec.md §4.5.1): counts the distinct `day`/`week`/`month`
//! periods the in-scope events touch, optionally filtered to periods whose
//! representative day survives a weekend/holiday/lookback filter, and
//! compares that count against `count`.

use std::collections::BTreeSet;

use chrono::Duration;

use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::period;
use crate::engine::predicate;
use crate::engine::tree::TimePeriodParams;
use crate::models::event::Event;

pub fn evaluate(
    params: &TimePeriodParams,
    events: &[Event],
    now: chrono::DateTime<chrono::Utc>,
) -> Result<EvalOutcome, EngineError> {
    let lookback_floor = params
        .lookback_days
        .map(|d| (now - Duration::days(d)).date_naive());

    let mut keys = BTreeSet::new();
    for event in events {
        let date = event.occurred_at.date_naive();
        if params.exclude_weekends && period::is_weekend(event.occurred_at) {
            continue;
        }
        if params.exclude_holidays && params.holidays.contains(&date) {
            continue;
        }
        if let Some(floor) = lookback_floor {
            if date < floor {
                continue;
            }
        }
        keys.insert(period::period_key(params.period_type, event.occurred_at));
    }

    let unique_period_count = keys.len();
    let result = predicate::matches_all(
        Some(&serde_json::json!(unique_period_count)),
        &params.count,
    );

    let metadata = serde_json::json!({
        "unique_period_count": unique_period_count,
        "period_keys": keys.into_iter().collect::<Vec<_>>(),
    });

    Ok(EvalOutcome::new(result, metadata))
}
