//! `$pattern` (spec.md §4.5.2): buckets in-scope events into `periodType`
//! buckets and tests whether the resulting counts are consistent,
//! increasing, or decreasing.

use std::collections::BTreeMap;

use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::period;
use crate::engine::tree::{PatternKind, PatternParams};
use crate::models::event::Event;

pub fn evaluate(params: &PatternParams, events: &[Event]) -> Result<EvalOutcome, EngineError> {
    let mut buckets: BTreeMap<String, i64> = BTreeMap::new();
    for event in events {
        *buckets
            .entry(period::period_key(params.period_type, event.occurred_at))
            .or_insert(0) += 1;
    }
    // Period keys sort lexically in chronological order for all three
    // formats (`YYYY-MM-DD`, `YYYY-Www`, `YYYY-MM`).
    let counts: Vec<i64> = buckets.values().copied().collect();
    let n = counts.len();

    if n < params.min_periods {
        return Ok(EvalOutcome::new(
            false,
            serde_json::json!({
                "period_counts": counts,
                "average_percent_change": Option::<f64>::None,
                "coefficient_of_variation": Option::<f64>::None,
                "trend_strength": 0.0,
                "ignored_outlier_index": Option::<usize>::None,
            }),
        ));
    }

    let (result, average_percent_change, coefficient_of_variation, trend_strength, ignored_outlier_index) =
        match params.pattern {
            PatternKind::Consistent => evaluate_consistent(&counts, params.max_deviation.unwrap_or(0.0)),
            PatternKind::Increasing => evaluate_monotonic(&counts, true, params.min_increase_pct.unwrap_or(0.0)),
            PatternKind::Decreasing => evaluate_monotonic(&counts, false, params.max_decrease_pct.unwrap_or(0.0)),
        };

    let metadata = serde_json::json!({
        "period_counts": counts,
        "average_percent_change": average_percent_change,
        "coefficient_of_variation": coefficient_of_variation,
        "trend_strength": trend_strength,
        "ignored_outlier_index": ignored_outlier_index,
    });

    Ok(EvalOutcome::new(result, metadata))
}

fn mean_std_cv(counts: &[i64]) -> (f64, f64, f64) {
    let n = counts.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mean = counts.iter().map(|&c| c as f64).sum::<f64>() / n;
    let variance = counts
        .iter()
        .map(|&c| {
            let d = c as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let std = variance.sqrt();
    let cv = if mean == 0.0 { 0.0 } else { std / mean };
    (mean, std, cv)
}

/// Tolerates a single outlier whose removal would bring the remaining
/// periods' coefficient of variation under the bound (spec.md §4.5.2).
fn evaluate_consistent(counts: &[i64], max_deviation: f64) -> (bool, Option<f64>, Option<f64>, f64, Option<usize>) {
    let (mean, _std, cv) = mean_std_cv(counts);
    if cv <= max_deviation {
        let strength = trend_strength_within(counts, mean, max_deviation);
        return (true, None, Some(cv), strength, None);
    }
    if counts.len() >= 2 {
        for i in 0..counts.len() {
            let mut remaining: Vec<i64> = counts.to_vec();
            remaining.remove(i);
            let (_, _, cv_without) = mean_std_cv(&remaining);
            if cv_without <= max_deviation {
                let strength = trend_strength_within(counts, mean, max_deviation);
                return (true, None, Some(cv), strength, Some(i));
            }
        }
    }
    let strength = trend_strength_within(counts, mean, max_deviation);
    (false, None, Some(cv), strength, None)
}

fn trend_strength_within(counts: &[i64], mean: f64, max_deviation: f64) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    let bound = max_deviation * mean;
    let within = counts
        .iter()
        .filter(|&&c| (c as f64 - mean).abs() <= bound)
        .count();
    within as f64 / counts.len() as f64
}

fn pct_change(prev: i64, cur: i64) -> f64 {
    if prev == 0 && cur == 0 {
        0.0
    } else if prev == 0 {
        f64::INFINITY
    } else {
        100.0 * (cur as f64 - prev as f64) / prev as f64
    }
}

/// Shared by `increasing` and `decreasing`: `increasing=true` checks the
/// average percent change against a lower bound with a majority of
/// non-negative deltas; `increasing=false` checks its magnitude against a
/// lower bound with a majority of non-positive deltas.
fn evaluate_monotonic(
    counts: &[i64],
    increasing: bool,
    bound_pct: f64,
) -> (bool, Option<f64>, Option<f64>, f64, Option<usize>) {
    if counts.len() < 2 {
        return (false, None, None, 0.0, None);
    }
    let deltas: Vec<f64> = counts.windows(2).map(|w| pct_change(w[0], w[1])).collect();
    let avg = deltas.iter().sum::<f64>() / deltas.len() as f64;

    let matching = if increasing {
        deltas.iter().filter(|&&d| d >= 0.0).count()
    } else {
        deltas.iter().filter(|&&d| d <= 0.0).count()
    };
    let required = (deltas.len() as f64 / 2.0).ceil() as usize;
    let magnitude = if increasing { avg } else { -avg };

    let result = magnitude >= bound_pct && matching >= required;
    let trend_strength = matching as f64 / deltas.len() as f64;

    (result, Some(avg), None, trend_strength, None)
}
