//! `$aggregate` (spec.md §4.5.7): reduces a numeric payload property across
//! in-scope events with `sum`/`avg`/`min`/`max`/`count` and compares the
//! reduction against `result`. Non-numeric values are skipped; `avg` over
//! zero qualifying events evaluates to `false`.

use crate::engine::error::EngineError;
use crate::engine::outcome::EvalOutcome;
use crate::engine::predicate;
use crate::engine::tree::{AggFn, AggregateParams};
use crate::models::event::Event;

pub fn evaluate(params: &AggregateParams, events: &[Event]) -> Result<EvalOutcome, EngineError> {
    if params.function == AggFn::Count {
        let count = events.len();
        let result = predicate::matches_all(Some(&serde_json::json!(count)), &params.result);
        return Ok(EvalOutcome::new(
            result,
            serde_json::json!({"function": "count", "aggregated_value": count, "sample_size": count}),
        ));
    }

    let property = params.property.as_deref().unwrap_or_default();
    let values: Vec<f64> = events
        .iter()
        .filter_map(|e| {
            predicate::resolve_field(&e.payload, e.occurred_at, property)
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        })
        .collect();

    let sample_size = values.len();
    let (result, value) = if sample_size == 0 {
        (false, None)
    } else {
        let reduced = match params.function {
            AggFn::Sum => values.iter().sum::<f64>(),
            AggFn::Avg => values.iter().sum::<f64>() / sample_size as f64,
            AggFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggFn::Count => unreachable!(),
        };
        let matched = predicate::matches_all(Some(&serde_json::json!(reduced)), &params.result);
        (matched, Some(reduced))
    };

    let metadata = serde_json::json!({
        "function": function_name(params.function),
        "aggregated_value": value,
        "sample_size": sample_size,
    });

    Ok(EvalOutcome::new(result, metadata))
}

fn function_name(f: AggFn) -> &'static str {
    match f {
        AggFn::Sum => "sum",
        AggFn::Avg => "avg",
        AggFn::Min => "min",
        AggFn::Max => "max",
        AggFn::Count => "count",
    }
}
