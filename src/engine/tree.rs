//! The typed, recursive criteria tree (spec.md §4.7, §9 — "a tagged,
//! recursive variant of: logical combinator, selector, operator node,
//! predicate leaf"). `decode` turns the wire `serde_json::Value` (after the
//! time resolver has substituted every `$NOW` token) into this tree once, up
//! front, so the flow evaluator never has to re-inspect raw JSON shapes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::error::EngineError;
use super::predicate::CompareOp;

#[derive(Debug, Clone)]
pub enum CriteriaNode {
    And(Vec<CriteriaNode>),
    Or(Vec<CriteriaNode>),
    Not(Box<CriteriaNode>),
    Selector(Selector),
    Operator(OperatorKind),
}

/// `{event: "...", criteria: {...}}` (spec.md §4.4, §4.7 node kind 2).
#[derive(Debug, Clone)]
pub struct Selector {
    pub event: String,
    pub body: SelectorBody,
}

/// The decoded contents of a selector's `criteria` object: payload field
/// predicates, an optional `count` reduction, and at most one embedded
/// time/aggregation operator scoped to this selector's matched events.
#[derive(Debug, Clone, Default)]
pub struct SelectorBody {
    pub predicates: Vec<FieldPredicate>,
    pub count: Option<Vec<CompareOp>>,
    pub operator: Option<OperatorKind>,
}

#[derive(Debug, Clone)]
pub struct FieldPredicate {
    pub path: String,
    pub ops: Vec<CompareOp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodType {
    Day,
    Week,
    Month,
}

impl PeriodType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimePeriodParams {
    pub period_type: PeriodType,
    pub count: Vec<CompareOp>,
    pub exclude_weekends: bool,
    pub exclude_holidays: bool,
    pub holidays: HashSet<chrono::NaiveDate>,
    pub lookback_days: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    Consistent,
    Increasing,
    Decreasing,
}

#[derive(Debug, Clone)]
pub struct PatternParams {
    pub pattern: PatternKind,
    pub period_type: PeriodType,
    pub min_periods: usize,
    pub max_deviation: Option<f64>,
    pub min_increase_pct: Option<f64>,
    pub max_decrease_pct: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapPeriodType {
    All,
    BusinessDays,
}

#[derive(Debug, Clone)]
pub struct GapParams {
    pub min_gap_hours: Option<f64>,
    pub max_gap_hours: Option<f64>,
    pub period_type: GapPeriodType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DurationUnit {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "seconds" => Some(Self::Seconds),
            "minutes" => Some(Self::Minutes),
            "hours" => Some(Self::Hours),
            "days" => Some(Self::Days),
            _ => None,
        }
    }

    pub fn from_seconds(&self, secs: f64) -> f64 {
        match self {
            Self::Seconds => secs,
            Self::Minutes => secs / 60.0,
            Self::Hours => secs / 3600.0,
            Self::Days => secs / 86400.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DurationParams {
    pub start_event: Selector,
    pub end_event: Selector,
    pub match_property: String,
    pub unit: DurationUnit,
    pub duration_filter: Vec<CompareOp>,
    pub count: Option<Vec<CompareOp>>,
}

#[derive(Debug, Clone)]
pub struct SequenceParams {
    pub sequence: Vec<String>,
    pub max_gap_seconds: Option<f64>,
    pub require_strict: bool,
}

#[derive(Debug, Clone)]
pub struct TimeWindowParams {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub last: Option<String>,
    pub business_days_only: bool,
    pub flow: Box<CriteriaNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggFn {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "sum" => Some(Self::Sum),
            "avg" => Some(Self::Avg),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "count" => Some(Self::Count),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateParams {
    pub function: AggFn,
    pub property: Option<String>,
    pub result: Vec<CompareOp>,
}

#[derive(Debug, Clone)]
pub enum OperatorKind {
    TimePeriod(TimePeriodParams),
    Pattern(PatternParams),
    Gap(GapParams),
    Duration(DurationParams),
    Sequence(SequenceParams),
    TimeWindow(TimeWindowParams),
    Aggregate(AggregateParams),
}

const OPERATOR_KEYS: &[&str] = &[
    "$timePeriod",
    "$pattern",
    "$gap",
    "$duration",
    "$sequence",
    "$timeWindow",
    "$aggregate",
];

pub fn decode(path: &str, value: &Value) -> Result<CriteriaNode, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::invalid(path, "expected a JSON object"))?;

    if let Some(arr) = obj.get("$and") {
        let items = arr
            .as_array()
            .ok_or_else(|| EngineError::invalid(path, "$and expects an array"))?;
        let nodes = items
            .iter()
            .enumerate()
            .map(|(i, v)| decode(&child(path, format!("and/{i}")), v))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(CriteriaNode::And(nodes));
    }
    if let Some(arr) = obj.get("$or") {
        let items = arr
            .as_array()
            .ok_or_else(|| EngineError::invalid(path, "$or expects an array"))?;
        let nodes = items
            .iter()
            .enumerate()
            .map(|(i, v)| decode(&child(path, format!("or/{i}")), v))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(CriteriaNode::Or(nodes));
    }
    if let Some(inner) = obj.get("$not") {
        let node = decode(&child(path, "not"), inner)?;
        return Ok(CriteriaNode::Not(Box::new(node)));
    }
    if let Some(event) = obj.get("event") {
        let event = event
            .as_str()
            .ok_or_else(|| EngineError::invalid(path, "event must be a string"))?
            .to_string();
        let criteria = obj.get("criteria").cloned().unwrap_or(Value::Object(Default::default()));
        let body = decode_selector_body(&child(path, format!("event:{event}")), &criteria)?;
        return Ok(CriteriaNode::Selector(Selector { event, body }));
    }

    let present: Vec<&str> = OPERATOR_KEYS
        .iter()
        .copied()
        .filter(|k| obj.contains_key(*k))
        .collect();
    if present.len() > 1 {
        return Err(EngineError::invalid(
            path,
            format!("multiple operator keys in one node: {present:?}"),
        ));
    }
    if let Some(key) = present.first() {
        let kind = decode_operator(path, key, &obj[*key])?;
        return Ok(CriteriaNode::Operator(kind));
    }

    if let Some(unknown) = obj.keys().find(|k| k.starts_with('$')) {
        return Err(EngineError::invalid(
            path,
            format!("unknown operator key {unknown:?}"),
        ));
    }

    Err(EngineError::invalid(
        path,
        "a predicate-leaf node is only valid inside a selector's criteria",
    ))
}

fn decode_selector_body(path: &str, value: &Value) -> Result<SelectorBody, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::invalid(path, "criteria must be a JSON object"))?;

    let mut body = SelectorBody::default();

    let present: Vec<&str> = OPERATOR_KEYS
        .iter()
        .copied()
        .filter(|k| obj.contains_key(*k))
        .collect();
    if present.len() > 1 {
        return Err(EngineError::invalid(
            path,
            format!("multiple operator keys in one selector: {present:?}"),
        ));
    }
    if let Some(key) = present.first() {
        body.operator = Some(decode_operator(path, key, &obj[*key])?);
    }

    for (key, val) in obj {
        if key == "count" {
            body.count = Some(decode_compare_ops(&child(path, "count"), val)?);
            continue;
        }
        if OPERATOR_KEYS.contains(&key.as_str()) {
            continue;
        }
        if key.starts_with('$') {
            return Err(EngineError::invalid(
                path,
                format!("unknown operator key {key:?}"),
            ));
        }
        let ops = decode_compare_ops(&child(path, key), val)?;
        body.predicates.push(FieldPredicate {
            path: key.clone(),
            ops,
        });
    }

    Ok(body)
}

/// Decodes a predicate value into one or more comparisons. A bare literal
/// value means `$eq` (spec.md §4.3). An object whose keys are all
/// `$`-prefixed is a set of explicit comparisons (ANDed together); an object
/// with no `$`-prefixed keys is treated as a literal structural value for
/// `$eq` (deep equality).
pub fn decode_compare_ops(path: &str, value: &Value) -> Result<Vec<CompareOp>, EngineError> {
    if let Some(obj) = value.as_object() {
        if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) {
            let mut ops = Vec::with_capacity(obj.len());
            for (key, v) in obj {
                ops.push(CompareOp::parse(&child(path, key), key, v)?);
            }
            return Ok(ops);
        }
    }
    Ok(vec![CompareOp::Eq(value.clone())])
}

fn decode_operator(path: &str, key: &str, value: &Value) -> Result<OperatorKind, EngineError> {
    let p = child(path, key);
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::invalid(&p, format!("{key} expects a JSON object")))?;

    match key {
        "$timePeriod" => Ok(OperatorKind::TimePeriod(decode_time_period(&p, obj)?)),
        "$pattern" => Ok(OperatorKind::Pattern(decode_pattern(&p, obj)?)),
        "$gap" => Ok(OperatorKind::Gap(decode_gap(&p, obj)?)),
        "$duration" => Ok(OperatorKind::Duration(decode_duration(&p, obj)?)),
        "$sequence" => Ok(OperatorKind::Sequence(decode_sequence(&p, obj)?)),
        "$timeWindow" => Ok(OperatorKind::TimeWindow(decode_time_window(&p, obj)?)),
        "$aggregate" => Ok(OperatorKind::Aggregate(decode_aggregate(&p, obj)?)),
        _ => unreachable!("decode_operator called with non-operator key"),
    }
}

fn required<'a>(
    path: &str,
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a Value, EngineError> {
    obj.get(key)
        .ok_or_else(|| EngineError::invalid(path, format!("missing required parameter {key:?}")))
}

fn decode_time_period(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<TimePeriodParams, EngineError> {
    let period_type = required(path, obj, "periodType")?
        .as_str()
        .and_then(PeriodType::parse)
        .ok_or_else(|| EngineError::invalid(path, "periodType must be one of day/week/month"))?;
    let count = decode_compare_ops(&child(path, "count"), required(path, obj, "count")?)?;
    let exclude_weekends = obj
        .get("excludeWeekends")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let exclude_holidays = obj
        .get("excludeHolidays")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let mut holidays = HashSet::new();
    if let Some(arr) = obj.get("holidays").and_then(Value::as_array) {
        for v in arr {
            let s = v
                .as_str()
                .ok_or_else(|| EngineError::invalid(path, "holidays entries must be strings"))?;
            let d = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|_| EngineError::invalid(path, format!("invalid holiday date {s:?}")))?;
            holidays.insert(d);
        }
    }
    let lookback_days = obj.get("lookbackDays").and_then(Value::as_i64);

    Ok(TimePeriodParams {
        period_type,
        count,
        exclude_weekends,
        exclude_holidays,
        holidays,
        lookback_days,
    })
}

fn decode_pattern(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<PatternParams, EngineError> {
    let pattern = match required(path, obj, "pattern")?.as_str() {
        Some("consistent") => PatternKind::Consistent,
        Some("increasing") => PatternKind::Increasing,
        Some("decreasing") => PatternKind::Decreasing,
        _ => {
            return Err(EngineError::invalid(
                path,
                "pattern must be one of consistent/increasing/decreasing",
            ))
        }
    };
    let period_type = required(path, obj, "periodType")?
        .as_str()
        .and_then(PeriodType::parse)
        .ok_or_else(|| EngineError::invalid(path, "periodType must be one of day/week/month"))?;
    let min_periods = required(path, obj, "minPeriods")?
        .as_u64()
        .ok_or_else(|| EngineError::invalid(path, "minPeriods must be a non-negative integer"))?
        as usize;
    let max_deviation = obj.get("maxDeviation").and_then(Value::as_f64);
    let min_increase_pct = obj.get("minIncreasePct").and_then(Value::as_f64);
    let max_decrease_pct = obj.get("maxDecreasePct").and_then(Value::as_f64);

    match pattern {
        PatternKind::Consistent if max_deviation.is_none() => {
            return Err(EngineError::invalid(
                path,
                "consistent pattern requires maxDeviation",
            ))
        }
        PatternKind::Increasing if min_increase_pct.is_none() => {
            return Err(EngineError::invalid(
                path,
                "increasing pattern requires minIncreasePct",
            ))
        }
        PatternKind::Decreasing if max_decrease_pct.is_none() => {
            return Err(EngineError::invalid(
                path,
                "decreasing pattern requires maxDecreasePct",
            ))
        }
        _ => {}
    }

    Ok(PatternParams {
        pattern,
        period_type,
        min_periods,
        max_deviation,
        min_increase_pct,
        max_decrease_pct,
    })
}

fn decode_gap(path: &str, obj: &serde_json::Map<String, Value>) -> Result<GapParams, EngineError> {
    let min_gap_hours = obj.get("minGapHours").and_then(Value::as_f64);
    let max_gap_hours = obj.get("maxGapHours").and_then(Value::as_f64);
    let period_type = match obj.get("periodType").and_then(Value::as_str) {
        None | Some("all") => GapPeriodType::All,
        Some("business-days") => GapPeriodType::BusinessDays,
        Some(other) => {
            return Err(EngineError::invalid(
                path,
                format!("unknown $gap periodType {other:?}"),
            ))
        }
    };
    if min_gap_hours.is_none() && max_gap_hours.is_none() {
        return Err(EngineError::invalid(
            path,
            "$gap requires at least one of minGapHours/maxGapHours",
        ));
    }
    Ok(GapParams {
        min_gap_hours,
        max_gap_hours,
        period_type,
    })
}

fn decode_duration(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<DurationParams, EngineError> {
    let start_event = decode_sub_selector(&child(path, "startEvent"), required(path, obj, "startEvent")?)?;
    let end_event = decode_sub_selector(&child(path, "endEvent"), required(path, obj, "endEvent")?)?;
    let match_property = required(path, obj, "matchProperty")?
        .as_str()
        .ok_or_else(|| EngineError::invalid(path, "matchProperty must be a string"))?
        .to_string();
    let unit = match obj.get("unit").and_then(Value::as_str) {
        None => DurationUnit::Hours,
        Some(s) => DurationUnit::parse(s)
            .ok_or_else(|| EngineError::invalid(path, format!("unknown duration unit {s:?}")))?,
    };

    let duration_value = required(path, obj, "duration")?;
    let duration_obj = duration_value
        .as_object()
        .ok_or_else(|| EngineError::invalid(path, "duration must be a JSON object"))?;
    let count = match duration_obj.get("count") {
        Some(c) => Some(decode_compare_ops(&child(path, "duration/count"), c)?),
        None => None,
    };
    let mut filter_obj = duration_obj.clone();
    filter_obj.remove("count");
    let duration_filter = if filter_obj.is_empty() {
        Vec::new()
    } else {
        decode_compare_ops(&child(path, "duration"), &Value::Object(filter_obj))?
    };

    Ok(DurationParams {
        start_event,
        end_event,
        match_property,
        unit,
        duration_filter,
        count,
    })
}

fn decode_sub_selector(path: &str, value: &Value) -> Result<Selector, EngineError> {
    let obj = value
        .as_object()
        .ok_or_else(|| EngineError::invalid(path, "expected a selector sub-flow object"))?;
    let event = obj
        .get("event")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::invalid(path, "selector sub-flow requires event"))?
        .to_string();
    let criteria = obj.get("criteria").cloned().unwrap_or(Value::Object(Default::default()));
    let body = decode_selector_body(path, &criteria)?;
    Ok(Selector { event, body })
}

fn decode_sequence(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<SequenceParams, EngineError> {
    let sequence = required(path, obj, "sequence")?
        .as_array()
        .ok_or_else(|| EngineError::invalid(path, "sequence must be an array"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| EngineError::invalid(path, "sequence entries must be strings"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if sequence.is_empty() {
        return Err(EngineError::invalid(path, "sequence must not be empty"));
    }
    let max_gap_seconds = obj.get("maxGapSeconds").and_then(Value::as_f64);
    let require_strict = obj.get("requireStrict").and_then(Value::as_bool).unwrap_or(false);
    Ok(SequenceParams {
        sequence,
        max_gap_seconds,
        require_strict,
    })
}

fn decode_time_window(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<TimeWindowParams, EngineError> {
    let start = match obj.get("start") {
        Some(v) => Some(parse_instant(path, v)?),
        None => None,
    };
    let end = match obj.get("end") {
        Some(v) => Some(parse_instant(path, v)?),
        None => None,
    };
    let last = obj
        .get("last")
        .and_then(Value::as_str)
        .map(str::to_string);

    if last.is_some() && (start.is_some() || end.is_some()) {
        return Err(EngineError::invalid(
            path,
            "$timeWindow: `last` is mutually exclusive with start/end",
        ));
    }

    let business_days_only = obj
        .get("businessDaysOnly")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let flow_value = required(path, obj, "flow")?;
    let flow = Box::new(decode(&child(path, "flow"), flow_value)?);

    Ok(TimeWindowParams {
        start,
        end,
        last,
        business_days_only,
        flow,
    })
}

fn parse_instant(path: &str, value: &Value) -> Result<DateTime<Utc>, EngineError> {
    let s = value
        .as_str()
        .ok_or_else(|| EngineError::invalid(path, "expected an ISO-8601 timestamp string"))?;
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| EngineError::invalid(path, format!("invalid ISO-8601 timestamp {s:?}")))
}

fn decode_aggregate(
    path: &str,
    obj: &serde_json::Map<String, Value>,
) -> Result<AggregateParams, EngineError> {
    let function = required(path, obj, "function")?
        .as_str()
        .and_then(AggFn::parse)
        .ok_or_else(|| EngineError::invalid(path, "function must be one of sum/avg/min/max/count"))?;
    let property = obj.get("property").and_then(Value::as_str).map(str::to_string);
    if function != AggFn::Count && property.is_none() {
        return Err(EngineError::invalid(
            path,
            "$aggregate requires `property` unless function is count",
        ));
    }
    let result = decode_compare_ops(&child(path, "result"), required(path, obj, "result")?)?;
    Ok(AggregateParams {
        function,
        property,
        result,
    })
}

fn child(path: &str, segment: impl std::fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}/{segment}")
    }
}
