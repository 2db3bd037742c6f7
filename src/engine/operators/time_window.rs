//! `$timeWindow` (spec.md §4.5.6): resolves `start`/`end` or a trailing
//! `last` duration (e.g. `"30d"`) into a half-open `[lower, upper)` bound
//! and narrows the nested `flow`'s scope to it.

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::engine::error::EngineError;
use crate::engine::tree::TimeWindowParams;

static LAST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([smhdwMy])$").unwrap());

pub fn resolve_window(
    params: &TimeWindowParams,
    now: DateTime<Utc>,
    path: &str,
) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), EngineError> {
    if let Some(last) = &params.last {
        let caps = LAST_RE
            .captures(last)
            .ok_or_else(|| EngineError::invalid(path, format!("invalid $timeWindow.last {last:?}")))?;
        let amount: i64 = caps[1].parse().unwrap_or(0);
        let delta = match &caps[2] {
            "s" => Duration::seconds(amount),
            "m" => Duration::minutes(amount),
            "h" => Duration::hours(amount),
            "d" => Duration::days(amount),
            "w" => Duration::weeks(amount),
            "M" => Duration::days(amount * 30),
            "y" => Duration::days(amount * 365),
            _ => unreachable!(),
        };
        return Ok((Some(now - delta), Some(now)));
    }
    Ok((params.start, params.end))
}
