//! Scalar predicate evaluation. Comparisons never raise: a type mismatch
//! simply evaluates to `false`.

use chrono::{DateTime, NaiveTime, Utc};
use serde_json::Value;

use super::error::EngineError;

#[derive(Debug, Clone)]
pub enum CompareOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(String),
}

impl CompareOp {
    pub fn parse(path: &str, key: &str, value: &Value) -> Result<Self, EngineError> {
        match key {
            "$eq" => Ok(Self::Eq(value.clone())),
            "$ne" => Ok(Self::Ne(value.clone())),
            "$gt" => Ok(Self::Gt(value.clone())),
            "$gte" => Ok(Self::Gte(value.clone())),
            "$lt" => Ok(Self::Lt(value.clone())),
            "$lte" => Ok(Self::Lte(value.clone())),
            "$in" => Ok(Self::In(
                value
                    .as_array()
                    .ok_or_else(|| EngineError::invalid(path, "$in expects an array"))?
                    .clone(),
            )),
            "$nin" => Ok(Self::Nin(
                value
                    .as_array()
                    .ok_or_else(|| EngineError::invalid(path, "$nin expects an array"))?
                    .clone(),
            )),
            "$exists" => Ok(Self::Exists(
                value
                    .as_bool()
                    .ok_or_else(|| EngineError::invalid(path, "$exists expects a boolean"))?,
            )),
            "$regex" => Ok(Self::Regex(
                value
                    .as_str()
                    .ok_or_else(|| EngineError::invalid(path, "$regex expects a string"))?
                    .to_string(),
            )),
            other => Err(EngineError::invalid(path, format!("unknown operator {other:?}"))),
        }
    }
}

/// Matches a resolved field value (`None` if the field path was unresolved)
/// against one comparison. Never errors — unsupported comparisons or type
/// mismatches degrade to `false` (spec.md §4.3, §7).
pub fn matches(field: Option<&Value>, op: &CompareOp) -> bool {
    match op {
        CompareOp::Exists(expected) => field.is_some() == *expected,
        CompareOp::Eq(v) => field.map(|f| values_equal(f, v)).unwrap_or(false),
        CompareOp::Ne(v) => field.map(|f| !values_equal(f, v)).unwrap_or(false),
        CompareOp::Gt(v) => compare(field, v).map(|o| o.is_gt()).unwrap_or(false),
        CompareOp::Gte(v) => compare(field, v).map(|o| o.is_ge()).unwrap_or(false),
        CompareOp::Lt(v) => compare(field, v).map(|o| o.is_lt()).unwrap_or(false),
        CompareOp::Lte(v) => compare(field, v).map(|o| o.is_le()).unwrap_or(false),
        CompareOp::In(values) => field
            .map(|f| values.iter().any(|v| values_equal(f, v)))
            .unwrap_or(false),
        CompareOp::Nin(values) => field
            .map(|f| !values.iter().any(|v| values_equal(f, v)))
            .unwrap_or(false),
        CompareOp::Regex(pattern) => field
            .and_then(Value::as_str)
            .and_then(|s| regex::Regex::new(pattern).ok().map(|re| re.is_match(s)))
            .unwrap_or(false),
    }
}

pub fn matches_all(field: Option<&Value>, ops: &[CompareOp]) -> bool {
    ops.iter().all(|op| matches(field, op))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (as_f64(a), as_f64(b)) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (as_instant(a), as_instant(b)) {
        return x == y;
    }
    a == b
}

/// Ordinal comparison. Numeric comparisons coerce both sides to `f64`;
/// ISO-8601 time strings compare as instants when both sides parse as such;
/// otherwise strings compare ordinally. Mixed/incomparable types yield
/// `None` (treated as a non-match by the caller).
fn compare(field: Option<&Value>, literal: &Value) -> Option<std::cmp::Ordering> {
    let field = field?;
    if let (Some(a), Some(b)) = (as_f64(field), as_f64(literal)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_instant(field), as_instant(literal)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (field.as_str(), literal.as_str()) {
        return Some(a.cmp(b));
    }
    None
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

fn as_instant(v: &Value) -> Option<DateTime<Utc>> {
    let s = v.as_str()?;
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

/// Resolves a dotted path (`a.b.c`) into a payload's nested mapping, plus
/// the two pseudo-fields `timestamp` (the event's occurrence instant, as
/// RFC3339) and `time` (its `HH:MM:SS` UTC time-of-day) that let criteria
/// predicate on the event envelope itself rather than its payload — needed
/// to express the "5 check-ins before 09:00 UTC" and "$NOW(-30d)" scenarios
/// in spec.md §8.
pub fn resolve_field<'a>(
    payload: &'a Value,
    occurred_at: DateTime<Utc>,
    path: &str,
) -> Option<std::borrow::Cow<'a, Value>> {
    if path == "timestamp" {
        return Some(std::borrow::Cow::Owned(Value::String(
            occurred_at.to_rfc3339(),
        )));
    }
    if path == "time" {
        let t: NaiveTime = occurred_at.time();
        return Some(std::borrow::Cow::Owned(Value::String(
            t.format("%H:%M:%S").to_string(),
        )));
    }

    let mut current = payload;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(std::borrow::Cow::Borrowed(current))
}
