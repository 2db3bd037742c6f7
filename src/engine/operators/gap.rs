//! `$gap` (spec.md §4.5.3): the hours between consecutive in-scope events,
//! optionally with whole weekend days subtracted, checked against
//! `minGapHours`/`maxGapHours`. Checking the smallest and largest observed
//! gap against the bounds is equivalent to checking every individual gap.

use chrono::{Datelike, Duration};

use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::tree::{GapParams, GapPeriodType};
use crate::models::event::Event;

pub fn evaluate(params: &GapParams, events: &[Event]) -> Result<EvalOutcome, EngineError> {
    if events.len() < 2 {
        return Ok(EvalOutcome::new(
            false,
            serde_json::json!({
                "gap_hours": Vec::<f64>::new(),
                "min_observed": Option::<f64>::None,
                "max_observed": Option::<f64>::None,
            }),
        ));
    }

    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));

    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|w| gap_hours(w[0], w[1], params.period_type))
        .collect();

    let min_observed = gaps.iter().copied().fold(f64::INFINITY, f64::min);
    let max_observed = gaps.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let result = params.min_gap_hours.map(|b| min_observed >= b).unwrap_or(true)
        && params.max_gap_hours.map(|b| max_observed <= b).unwrap_or(true);

    let metadata = serde_json::json!({
        "gap_hours": gaps,
        "min_observed": min_observed,
        "max_observed": max_observed,
    });

    Ok(EvalOutcome::new(result, metadata))
}

fn gap_hours(prev: &Event, next: &Event, period_type: GapPeriodType) -> f64 {
    let raw = (next.occurred_at - prev.occurred_at).num_seconds() as f64 / 3600.0;
    if period_type != GapPeriodType::BusinessDays {
        return raw;
    }
    let mut weekend_days = 0i64;
    let mut d = prev.occurred_at.date_naive() + Duration::days(1);
    while d < next.occurred_at.date_naive() {
        if matches!(d.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
            weekend_days += 1;
        }
        d += Duration::days(1);
    }
    (raw - (weekend_days * 24) as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn event(id: i64, at: chrono::DateTime<Utc>) -> Event {
        Event {
            id,
            user_id: "user-1".to_string(),
            event_type_id: Uuid::new_v4(),
            occurred_at: at,
            payload: serde_json::json!({}),
        }
    }

    #[test]
    fn fewer_than_two_events_is_false_not_error() {
        let events = vec![event(1, Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap())];
        let params = GapParams {
            min_gap_hours: Some(1.0),
            max_gap_hours: None,
            period_type: GapPeriodType::All,
        };
        let outcome = evaluate(&params, &events).unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.metadata["min_observed"], serde_json::Value::Null);
    }

    #[test]
    fn passes_when_every_gap_is_within_bounds() {
        let events = vec![
            event(1, Utc.with_ymd_and_hms(2023, 12, 11, 8, 0, 0).unwrap()),
            event(2, Utc.with_ymd_and_hms(2023, 12, 12, 8, 0, 0).unwrap()),
            event(3, Utc.with_ymd_and_hms(2023, 12, 13, 8, 0, 0).unwrap()),
        ];
        let params = GapParams {
            min_gap_hours: Some(20.0),
            max_gap_hours: Some(28.0),
            period_type: GapPeriodType::All,
        };
        let outcome = evaluate(&params, &events).unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["min_observed"], serde_json::json!(24.0));
        assert_eq!(outcome.metadata["max_observed"], serde_json::json!(24.0));
    }

    #[test]
    fn fails_when_worst_gap_violates_bound() {
        let events = vec![
            event(1, Utc.with_ymd_and_hms(2023, 12, 11, 8, 0, 0).unwrap()),
            event(2, Utc.with_ymd_and_hms(2023, 12, 12, 8, 0, 0).unwrap()),
            event(3, Utc.with_ymd_and_hms(2023, 12, 20, 8, 0, 0).unwrap()),
        ];
        let params = GapParams {
            min_gap_hours: None,
            max_gap_hours: Some(48.0),
            period_type: GapPeriodType::All,
        };
        let outcome = evaluate(&params, &events).unwrap();
        assert!(!outcome.result);
    }

    #[test]
    fn business_days_period_type_subtracts_whole_weekends() {
        // Friday 2023-12-15 08:00 to Monday 2023-12-18 08:00 is 72 raw hours,
        // minus one weekend (Sat+Sun) = 24 business hours.
        let events = vec![
            event(1, Utc.with_ymd_and_hms(2023, 12, 15, 8, 0, 0).unwrap()),
            event(2, Utc.with_ymd_and_hms(2023, 12, 18, 8, 0, 0).unwrap()),
        ];
        let params = GapParams {
            min_gap_hours: None,
            max_gap_hours: Some(30.0),
            period_type: GapPeriodType::BusinessDays,
        };
        let outcome = evaluate(&params, &events).unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["max_observed"], serde_json::json!(24.0));
    }
}
