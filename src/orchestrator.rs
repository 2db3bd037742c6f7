//! The ingestion orchestrator: appends an incoming event, then re-evaluates
//! every active badge the event type could affect for that user. Evaluation
//! for a single user is strictly serialized, so two events arriving back to
//! back can never race each other's badge awards, while concurrent
//! submissions from different users still run in parallel. The per-user
//! queue registry mirrors the keyed rate-limit registry used elsewhere in
//! this codebase for per-key state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::clock::Clock;
use crate::engine;
use crate::error::AppError;
use crate::models::award::UserBadge;
use crate::models::event::{SubmitEventRequest, SubmitEventResponse};
use crate::repository::{NewEvent, Repository};

struct Job {
    request: SubmitEventRequest,
    respond_to: oneshot::Sender<Result<SubmitEventResponse, AppError>>,
}

/// Shared, immutable state a per-user worker task needs: everything except
/// the queue registry itself, which only the dispatcher touches.
struct Worker {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    eval_timeout: Duration,
}

#[derive(Clone)]
pub struct Orchestrator {
    worker: Arc<Worker>,
    queues: Arc<Mutex<HashMap<String, mpsc::Sender<Job>>>>,
}

impl Orchestrator {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, eval_timeout: Duration) -> Self {
        Self {
            worker: Arc::new(Worker {
                repo,
                clock,
                eval_timeout,
            }),
            queues: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submits an event for processing and waits for its badge evaluation
    /// pass to finish. Events for the same `user_id` are processed one at a
    /// time, in submission order; different users run concurrently.
    pub async fn submit(&self, request: SubmitEventRequest) -> Result<SubmitEventResponse, AppError> {
        let sender = self.queue_for(&request.user_id).await;
        let (respond_to, receiver) = oneshot::channel();
        sender
            .send(Job { request, respond_to })
            .await
            .map_err(|_| AppError::Internal(anyhow::anyhow!("evaluation worker unexpectedly stopped")))?;
        receiver
            .await
            .map_err(|_| AppError::Internal(anyhow::anyhow!("evaluation worker dropped the response channel")))?
    }

    async fn queue_for(&self, user_id: &str) -> mpsc::Sender<Job> {
        let mut queues = self.queues.lock().await;
        if let Some(sender) = queues.get(user_id) {
            if !sender.is_closed() {
                return sender.clone();
            }
        }
        let (sender, receiver) = mpsc::channel(64);
        tokio::spawn(run_worker(self.worker.clone(), receiver));
        queues.insert(user_id.to_string(), sender.clone());
        sender
    }
}

async fn run_worker(worker: Arc<Worker>, mut receiver: mpsc::Receiver<Job>) {
    while let Some(job) = receiver.recv().await {
        let result = process(&worker, job.request).await;
        let _ = job.respond_to.send(result);
    }
}

async fn process(worker: &Worker, request: SubmitEventRequest) -> Result<SubmitEventResponse, AppError> {
    let event_type = worker
        .repo
        .lookup_event_type_by_name(&request.event_type)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("unknown event type {:?}", request.event_type)))?;

    let occurred_at = request.timestamp.unwrap_or_else(|| worker.clock.now());
    let event = worker
        .repo
        .append_event(NewEvent {
            user_id: request.user_id.clone(),
            event_type_id: event_type.id,
            occurred_at,
            payload: request.payload,
        })
        .await?;

    let newly_awarded = evaluate_badges(worker, &request.user_id, &request.event_type).await?;

    Ok(SubmitEventResponse {
        event_id: event.id,
        newly_awarded,
    })
}

/// Re-evaluates every active badge whose criteria could be affected by
/// `event_type_name`, containing each badge's failure independently so one
/// broken criteria definition never blocks another badge's award.
async fn evaluate_badges(
    worker: &Worker,
    user_id: &str,
    event_type_name: &str,
) -> Result<Vec<UserBadge>, AppError> {
    let badges = worker.repo.list_active_badges().await?;
    let mut newly_awarded = Vec::new();

    for badge in badges {
        let Some(criteria) = worker.repo.load_criteria(badge.id).await? else {
            continue;
        };
        if !criteria.references(event_type_name) {
            continue;
        }
        if worker.repo.has_award(user_id, badge.id).await? {
            continue;
        }

        let eval = engine::evaluate(
            &criteria.flow_definition,
            user_id,
            worker.clock.as_ref(),
            worker.repo.as_ref(),
        );

        match tokio::time::timeout(worker.eval_timeout, eval).await {
            Ok(Ok(outcome)) if outcome.result => {
                let awarded_at = worker.clock.now();
                match worker
                    .repo
                    .record_award(user_id, badge.id, outcome.metadata.clone(), awarded_at)
                    .await
                {
                    Ok(true) => newly_awarded.push(UserBadge {
                        user_id: user_id.to_string(),
                        badge_id: badge.id,
                        awarded_at,
                        metadata: outcome.metadata,
                    }),
                    Ok(false) => {
                        // Already recorded by a concurrent pass; idempotent no-op.
                    }
                    Err(e) => {
                        tracing::error!(badge_id = %badge.id, %user_id, error = %e, "failed to record badge award");
                    }
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    badge_id = %badge.id,
                    %user_id,
                    error = %e,
                    path = %e.path(),
                    "badge criteria evaluation failed"
                );
            }
            Err(_elapsed) => {
                tracing::error!(badge_id = %badge.id, %user_id, "badge criteria evaluation timed out");
            }
        }
    }

    Ok(newly_awarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::badge::Badge;
    use crate::models::criteria::BadgeCriteria;
    use crate::repository::memory::InMemoryRepository;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use uuid::Uuid;

    fn bug_hunter_badge() -> (Badge, BadgeCriteria) {
        let id = Uuid::new_v4();
        let now = Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap();
        let badge = Badge {
            id,
            name: "Bug Hunter".to_string(),
            description: None,
            image_ref: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        let criteria = BadgeCriteria {
            badge_id: id,
            version: 1,
            flow_definition: json!({
                "event": "bug-report",
                "criteria": {"status": "fixed", "count": {"$gte": 5}},
            }),
            event_type_refs: vec!["bug-report".to_string()],
            created_at: now,
            updated_at: now,
        };
        (badge, criteria)
    }

    /// Re-submitting an event for an already-awarded badge neither creates a
    /// second award row nor changes the original `awarded_at`.
    #[tokio::test]
    async fn repeat_submission_after_award_is_a_no_op() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.register_event_type("bug-report");
        let (badge, criteria) = bug_hunter_badge();
        repo.register_badge(badge.clone(), criteria);

        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap()));
        let orchestrator = Orchestrator::new(
            repo.clone() as Arc<dyn Repository>,
            clock.clone() as Arc<dyn Clock>,
            Duration::from_secs(1),
        );

        let submit_fixed = |user: &str| SubmitEventRequest {
            event_type: "bug-report".to_string(),
            user_id: user.to_string(),
            payload: json!({"status": "fixed"}),
            timestamp: None,
        };
        let submit_in_progress = |user: &str| SubmitEventRequest {
            event_type: "bug-report".to_string(),
            user_id: user.to_string(),
            payload: json!({"status": "in_progress"}),
            timestamp: None,
        };

        let user = "user-1";
        for _ in 0..4 {
            let resp = orchestrator.submit(submit_fixed(user)).await.unwrap();
            assert!(resp.newly_awarded.is_empty());
        }
        let resp = orchestrator.submit(submit_in_progress(user)).await.unwrap();
        assert!(resp.newly_awarded.is_empty());

        // The fifth "fixed" report tips matched_count to 5 and earns the badge.
        let resp = orchestrator.submit(submit_fixed(user)).await.unwrap();
        assert_eq!(resp.newly_awarded.len(), 1);
        assert_eq!(resp.newly_awarded[0].badge_id, badge.id);
        let awarded_at = resp.newly_awarded[0].awarded_at;

        // One more "fixed" report: already awarded, so this is a no-op.
        let resp = orchestrator.submit(submit_fixed(user)).await.unwrap();
        assert!(resp.newly_awarded.is_empty());

        let awards = repo.list_awards(user).await.unwrap();
        assert_eq!(awards.len(), 1);
        assert_eq!(awards[0].awarded_at, awarded_at);
    }

    /// Different users' submissions never block each other: two users
    /// submitting concurrently both get evaluated independently.
    #[tokio::test]
    async fn per_user_queues_are_independent() {
        let repo = Arc::new(InMemoryRepository::new());
        repo.register_event_type("bug-report");
        let (badge, criteria) = bug_hunter_badge();
        repo.register_badge(badge, criteria);

        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap()));
        let orchestrator = Orchestrator::new(
            repo.clone() as Arc<dyn Repository>,
            clock as Arc<dyn Clock>,
            Duration::from_secs(1),
        );

        let submit_fixed = |user: &str| SubmitEventRequest {
            event_type: "bug-report".to_string(),
            user_id: user.to_string(),
            payload: json!({"status": "fixed"}),
            timestamp: None,
        };

        let a = orchestrator.submit(submit_fixed("user-a"));
        let b = orchestrator.submit(submit_fixed("user-b"));
        let (a, b) = tokio::join!(a, b);
        assert!(a.unwrap().newly_awarded.is_empty());
        assert!(b.unwrap().newly_awarded.is_empty());

        assert!(repo.list_awards("user-a").await.unwrap().is_empty());
        assert!(repo.list_awards("user-b").await.unwrap().is_empty());
    }
}
