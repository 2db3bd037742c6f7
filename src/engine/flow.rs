//! The recursive flow evaluator: walks a decoded `CriteriaNode` tree,
//! dispatching combinators, selectors, and operators, and merges each node's
//! metadata under a keyed slot (`and/0`, `or/1`, ...) matching the dotted
//! path used for error reporting.

use serde_json::Value;

use crate::models::event::Event;
use crate::repository::Repository;

use super::context::EvalContext;
use super::error::EngineError;
use super::operators;
use super::outcome::EvalOutcome;
use super::predicate;
use super::selector;
use super::tree::{CriteriaNode, OperatorKind, Selector};

pub async fn eval(
    node: &CriteriaNode,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    match node {
        CriteriaNode::And(nodes) => eval_and(nodes, ctx, repo, path).await,
        CriteriaNode::Or(nodes) => eval_or(nodes, ctx, repo, path).await,
        CriteriaNode::Not(inner) => eval_not(inner, ctx, repo, path).await,
        CriteriaNode::Selector(sel) => eval_selector(sel, ctx, repo, path).await,
        CriteriaNode::Operator(op) => eval_operator(op, None, ctx, repo, path).await,
    }
}

/// Short-circuits on the first `false` child. Evaluation of remaining
/// children, and their metadata, is skipped.
async fn eval_and(
    nodes: &[CriteriaNode],
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let mut metadata = serde_json::Map::new();
    let mut result = true;
    for (i, node) in nodes.iter().enumerate() {
        if !result {
            break;
        }
        let child_path = child(path, format!("and/{i}"));
        let outcome = Box::pin(eval(node, ctx, repo, &child_path)).await?;
        result = outcome.result;
        metadata.insert(format!("and/{i}"), outcome.metadata);
    }
    Ok(EvalOutcome::new(result, Value::Object(metadata)))
}

async fn eval_or(
    nodes: &[CriteriaNode],
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let mut metadata = serde_json::Map::new();
    let mut result = false;
    for (i, node) in nodes.iter().enumerate() {
        if result {
            break;
        }
        let child_path = child(path, format!("or/{i}"));
        let outcome = Box::pin(eval(node, ctx, repo, &child_path)).await?;
        result = outcome.result;
        metadata.insert(format!("or/{i}"), outcome.metadata);
    }
    Ok(EvalOutcome::new(result, Value::Object(metadata)))
}

async fn eval_not(
    inner: &CriteriaNode,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let child_path = child(path, "not");
    let outcome = Box::pin(eval(inner, ctx, repo, &child_path)).await?;
    let mut metadata = serde_json::Map::new();
    metadata.insert("not".to_string(), outcome.metadata);
    Ok(EvalOutcome::new(!outcome.result, Value::Object(metadata)))
}

async fn eval_selector(
    sel: &Selector,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    let selection = selector::select(sel, ctx, repo, path).await?;
    let mut metadata = selection
        .metadata
        .as_object()
        .cloned()
        .unwrap_or_default();

    let mut result = true;
    if let Some(count_ops) = &sel.body.count {
        result = predicate::matches_all(
            Some(&serde_json::json!(selection.events.len())),
            count_ops,
        );
    }

    if let Some(op) = &sel.body.operator {
        let outcome = eval_operator(op, Some(&selection.events), ctx, repo, path).await?;
        if let Some(obj) = outcome.metadata.as_object() {
            for (k, v) in obj {
                metadata.insert(k.clone(), v.clone());
            }
        }
        result = result && outcome.result;
    } else if sel.body.count.is_none() {
        // A selector with plain predicate leaves but neither `count` nor an
        // embedded operator reduces to "did at least one matching event
        // occur". This case is otherwise left implicit; every other
        // scenario reaches for `count` or an operator to express anything
        // stricter.
        result = !selection.events.is_empty();
    }

    Ok(EvalOutcome::new(result, Value::Object(metadata)))
}

async fn eval_operator(
    op: &OperatorKind,
    in_scope: Option<&[Event]>,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<EvalOutcome, EngineError> {
    match op {
        OperatorKind::TimePeriod(p) => {
            let events = resolve_in_scope(in_scope, ctx, repo, path).await?;
            operators::time_period::evaluate(p, &events, ctx.now)
        }
        OperatorKind::Pattern(p) => {
            let events = resolve_in_scope(in_scope, ctx, repo, path).await?;
            operators::pattern::evaluate(p, &events)
        }
        OperatorKind::Gap(p) => {
            let events = resolve_in_scope(in_scope, ctx, repo, path).await?;
            operators::gap::evaluate(p, &events)
        }
        OperatorKind::Aggregate(p) => {
            let events = resolve_in_scope(in_scope, ctx, repo, path).await?;
            operators::aggregate::evaluate(p, &events)
        }
        OperatorKind::Duration(p) => {
            operators::duration::evaluate(p, ctx, repo, &child(path, "duration")).await
        }
        OperatorKind::Sequence(p) => {
            operators::sequence::evaluate(p, ctx, repo, &child(path, "sequence")).await
        }
        OperatorKind::TimeWindow(p) => {
            let (lower, upper) =
                operators::time_window::resolve_window(p, ctx.now, &child(path, "timeWindow"))?;
            let narrowed = ctx.narrowed(lower, upper, p.business_days_only);
            Box::pin(eval(&p.flow, &narrowed, repo, &child(path, "timeWindow/flow"))).await
        }
    }
}

/// Events a standalone (non-selector-embedded) operator runs over: the
/// selector's already-filtered matches when embedded, or the user's full
/// event history within the active window when standalone (i.e. at the root
/// of a criteria tree).
async fn resolve_in_scope(
    in_scope: Option<&[Event]>,
    ctx: &EvalContext,
    repo: &dyn Repository,
    path: &str,
) -> Result<Vec<Event>, EngineError> {
    match in_scope {
        Some(events) => Ok(events.to_vec()),
        None => {
            let events = repo
                .query_events(&ctx.user, None, ctx.window_lower, ctx.window_upper)
                .await
                .map_err(|e| EngineError::storage(path, e.to_string()))?;
            Ok(events
                .into_iter()
                .filter(|e| !(ctx.exclude_weekends && super::period::is_weekend(e.occurred_at)))
                .collect())
        }
    }
}

fn child(path: &str, segment: impl std::fmt::Display) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}/{segment}")
    }
}
