//! Resolves `$NOW` / `$NOW(±<n><unit>)` tokens against a single frozen
//! clock instant, walking the raw criteria JSON before it is decoded into
//! the typed tree (spec.md §4.2).

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::error::EngineError;

static TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\$NOW(?:\(([+-])(\d+)([smhdwMy])\))?$").unwrap());

/// Walks `value` recursively, replacing every string matching the `$NOW`
/// grammar with its resolved ISO-8601 UTC instant. A single evaluation
/// passes the same `now` to every token (spec.md §4.2 — "consistency").
pub fn resolve(value: &Value, now: DateTime<Utc>, path: &str) -> Result<Value, EngineError> {
    match value {
        Value::String(s) => {
            if s.starts_with("$NOW") {
                let resolved = resolve_token(s, now, path)?;
                Ok(Value::String(resolved.to_rfc3339()))
            } else {
                Ok(value.clone())
            }
        }
        Value::Array(items) => {
            let resolved = items
                .iter()
                .enumerate()
                .map(|(i, v)| resolve(v, now, &child(path, i)))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(resolved))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), resolve(v, now, &child(path, k))?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_token(token: &str, now: DateTime<Utc>, path: &str) -> Result<DateTime<Utc>, EngineError> {
    let caps = TOKEN_RE
        .captures(token)
        .ok_or_else(|| EngineError::invalid(path, format!("malformed $NOW token {token:?}")))?;

    let (Some(sign), Some(amount), Some(unit)) = (caps.get(1), caps.get(2), caps.get(3)) else {
        // bare "$NOW"
        return Ok(now);
    };

    let amount: i64 = amount
        .as_str()
        .parse()
        .map_err(|_| EngineError::invalid(path, format!("malformed $NOW amount in {token:?}")))?;
    let signed = if sign.as_str() == "-" { -amount } else { amount };

    match unit.as_str() {
        "s" => Ok(now + chrono::Duration::seconds(signed)),
        "m" => Ok(now + chrono::Duration::minutes(signed)),
        "h" => Ok(now + chrono::Duration::hours(signed)),
        "d" => Ok(now + chrono::Duration::days(signed)),
        "w" => Ok(now + chrono::Duration::days(signed * 7)),
        "M" => Ok(add_months(now, signed)),
        "y" => Ok(add_months(now, signed * 12)),
        other => Err(EngineError::invalid(
            path,
            format!("unknown $NOW unit {other:?} in {token:?}"),
        )),
    }
}

/// Adds calendar months to `dt`, clamping the day-of-month to the last valid
/// day of the target month (spec.md §4.2 — "end-of-month clamping per
/// standard civil calendar arithmetic").
fn add_months(dt: DateTime<Utc>, months: i64) -> DateTime<Utc> {
    let naive = dt.date_naive();
    let total_months = naive.year() as i64 * 12 + (naive.month() as i64 - 1) + months;
    let target_year = total_months.div_euclid(12) as i32;
    let target_month = (total_months.rem_euclid(12) + 1) as u32;
    let last_day = last_day_of_month(target_year, target_month);
    let day = naive.day().min(last_day);
    let new_date = NaiveDate::from_ymd_opt(target_year, target_month, day)
        .expect("clamped day is always valid for its month");
    DateTime::from_naive_utc_and_offset(new_date.and_time(dt.time()), Utc)
}

fn last_day_of_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid first-of-month")
        .pred_opt()
        .expect("valid predecessor")
        .day()
}

fn child(path: &str, segment: impl std::fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}/{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn bare_now_resolves_to_clock_instant() {
        let v = resolve(&json!("$NOW"), fixed_now(), "").unwrap();
        assert_eq!(v.as_str().unwrap(), fixed_now().to_rfc3339());
    }

    #[test]
    fn minus_30_days_resolves_correctly() {
        let v = resolve(&json!("$NOW(-30d)"), fixed_now(), "").unwrap();
        let resolved: DateTime<Utc> = DateTime::parse_from_rfc3339(v.as_str().unwrap())
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(resolved, Utc.with_ymd_and_hms(2023, 11, 15, 12, 0, 0).unwrap());
    }

    #[test]
    fn end_of_month_clamping() {
        let jan31 = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        let plus_one_month = add_months(jan31, 1);
        assert_eq!(plus_one_month.date_naive(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn malformed_token_is_an_error() {
        assert!(resolve(&json!("$NOW(30d)"), fixed_now(), "root").is_err());
        assert!(resolve(&json!("$NOW(+30x)"), fixed_now(), "root").is_err());
    }

    #[test]
    fn walks_nested_objects_and_arrays() {
        let tree = json!({"$and": [{"timestamp": {"$gte": "$NOW(-7d)"}}]});
        let resolved = resolve(&tree, fixed_now(), "").unwrap();
        let replaced = &resolved["$and"][0]["timestamp"]["$gte"];
        assert_ne!(replaced.as_str().unwrap(), "$NOW(-7d)");
    }
}
