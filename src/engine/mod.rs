//! The criteria interpreter: a pure function of `(flow_definition, user's
//! events, clock)` to `(bool, metadata)` (spec.md §9). No module in this
//! tree performs I/O beyond the injected [`Repository`] and [`Clock`].

pub mod context;
pub mod error;
pub mod flow;
pub mod operators;
pub mod outcome;
pub mod period;
pub mod predicate;
pub mod selector;
pub mod time_resolver;
pub mod tree;

use crate::clock::Clock;
use crate::repository::Repository;

pub use context::EvalContext;
pub use error::EngineError;
pub use outcome::EvalOutcome;

/// Evaluates one badge's `flow_definition` for one user: substitutes every
/// `$NOW` token against the clock's single frozen instant, decodes the
/// resulting tree, and walks it (spec.md §4.2, §4.6, §4.7).
pub async fn evaluate(
    flow_definition: &serde_json::Value,
    user_id: &str,
    clock: &dyn Clock,
    repo: &dyn Repository,
) -> Result<EvalOutcome, EngineError> {
    let now = clock.now();
    let resolved = time_resolver::resolve(flow_definition, now, "")?;
    let tree = tree::decode("", &resolved)?;
    let ctx = EvalContext::new(user_id, now);
    flow::eval(&tree, &ctx, repo, "").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::repository::memory::InMemoryRepository;
    use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Weekday};
    use serde_json::json;

    fn fixed_clock() -> FixedClock {
        // A Friday, so "today" anchors the weekday-only scenarios deterministically.
        FixedClock(Utc.with_ymd_and_hms(2023, 12, 15, 12, 0, 0).unwrap())
    }

    /// Scenario 1 (spec.md §8, "Consistency King"): 20 consecutive weekdays,
    /// each with a `check-in` at 08:30 and a `check-out` at 17:30, inside a
    /// 28-day lookback window.
    #[tokio::test]
    async fn consistency_king_awards_on_twenty_weekdays() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        let mut day = clock.0.date_naive();
        let mut seeded = 0;
        while seeded < 20 {
            if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
                let check_in = Utc.from_utc_datetime(&day.and_hms_opt(8, 30, 0).unwrap());
                let check_out = Utc.from_utc_datetime(&day.and_hms_opt(17, 30, 0).unwrap());
                repo.seed_event(user, "check-in", check_in, json!({}));
                repo.seed_event(user, "check-out", check_out, json!({}));
                seeded += 1;
            }
            day = day.pred_opt().unwrap();
        }

        let criteria = json!({
            "$and": [
                {"event": "check-in", "criteria": {"$timePeriod": {
                    "periodType": "day", "count": {"$gte": 20},
                    "excludeWeekends": true, "lookbackDays": 28,
                }}},
                {"event": "check-out", "criteria": {"$timePeriod": {
                    "periodType": "day", "count": {"$gte": 20},
                    "excludeWeekends": true, "lookbackDays": 28,
                }}},
            ]
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["and/0"]["unique_period_count"], json!(20));
        assert_eq!(outcome.metadata["and/1"]["unique_period_count"], json!(20));
    }

    /// Scenario 2 ("Early Bird"): only 3 of 5 check-ins land before 09:00, so
    /// the `count: {$gte: 5}` threshold is not met.
    #[tokio::test]
    async fn early_bird_not_awarded_when_too_few_match() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        for offset in 0..3 {
            let day = clock.0.date_naive() - ChronoDuration::days(offset);
            repo.seed_event(
                user,
                "check-in",
                Utc.from_utc_datetime(&day.and_hms_opt(8, 0, 0).unwrap()),
                json!({}),
            );
        }
        for offset in 3..5 {
            let day = clock.0.date_naive() - ChronoDuration::days(offset);
            repo.seed_event(
                user,
                "check-in",
                Utc.from_utc_datetime(&day.and_hms_opt(10, 0, 0).unwrap()),
                json!({}),
            );
        }

        let criteria = json!({
            "event": "check-in",
            "criteria": {"time": {"$lt": "09:00:00"}, "count": {"$gte": 5}},
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.metadata["matched_count"], json!(3));
        assert_eq!(outcome.metadata["total_count"], json!(5));
    }

    /// Scenario 3 ("Fitness Growth"): weekly workout counts of
    /// `[3, 3, 4, 4, 5, 6]` across 6 consecutive weeks satisfy `increasing`
    /// with at least a 10% average week-over-week gain.
    #[tokio::test]
    async fn fitness_growth_awards_on_increasing_weekly_counts() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        let weekly_counts = [3, 3, 4, 4, 5, 6];
        let first_monday = Utc.with_ymd_and_hms(2023, 11, 6, 0, 0, 0).unwrap();
        for (week, &count) in weekly_counts.iter().enumerate() {
            let monday = first_monday + ChronoDuration::weeks(week as i64);
            for i in 0..count {
                repo.seed_event(
                    user,
                    "workout-completed",
                    monday + ChronoDuration::hours(i),
                    json!({}),
                );
            }
        }

        let criteria = json!({
            "event": "workout-completed",
            "criteria": {"$pattern": {
                "pattern": "increasing", "periodType": "week",
                "minPeriods": 6, "minIncreasePct": 10,
            }},
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(outcome.result);
        let avg_change = outcome.metadata["average_percent_change"].as_f64().unwrap();
        assert!(avg_change >= 10.0, "average_percent_change was {avg_change}");
    }

    /// Scenario 4 ("Bug Hunter"): 5 of 6 bug reports carry `status: "fixed"`.
    #[tokio::test]
    async fn bug_hunter_awards_on_five_fixed_reports() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        for i in 0..5 {
            repo.seed_event(
                user,
                "bug-report",
                clock.0 - ChronoDuration::hours(i),
                json!({"status": "fixed"}),
            );
        }
        repo.seed_event(
            user,
            "bug-report",
            clock.0 - ChronoDuration::hours(6),
            json!({"status": "in_progress"}),
        );

        let criteria = json!({
            "event": "bug-report",
            "criteria": {"status": "fixed", "count": {"$gte": 5}},
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["matched_count"], json!(5));
    }

    /// Scenario 5 ("Dynamic time variable window"): only the 5 events within
    /// the last 30 days (per `$NOW(-30d)`) should count; the 3 events from 45
    /// days prior fall outside the resolved bound.
    #[tokio::test]
    async fn dynamic_time_window_awards_on_recent_events_only() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        for days_ago in [1, 3, 5, 7, 9] {
            repo.seed_event(
                user,
                "user_activity",
                clock.0 - ChronoDuration::days(days_ago),
                json!({}),
            );
        }
        for _ in 0..3 {
            repo.seed_event(
                user,
                "user_activity",
                clock.0 - ChronoDuration::days(45),
                json!({}),
            );
        }

        let criteria = json!({
            "event": "user_activity",
            "criteria": {"timestamp": {"$gte": "$NOW(-30d)"}, "count": {"$gte": 5}},
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.metadata["matched_count"], json!(5));
        assert_eq!(outcome.metadata["total_count"], json!(8));
    }

    /// `$timePeriod` distinct-key law (spec.md §8): a second event landing on
    /// an already-counted day does not inflate `unique_period_count`.
    #[tokio::test]
    async fn time_period_counts_distinct_days_once() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        let day = clock.0.date_naive();
        repo.seed_event(
            user,
            "check-in",
            Utc.from_utc_datetime(&day.and_hms_opt(8, 0, 0).unwrap()),
            json!({}),
        );
        repo.seed_event(
            user,
            "check-in",
            Utc.from_utc_datetime(&day.and_hms_opt(9, 0, 0).unwrap()),
            json!({}),
        );

        let criteria = json!({
            "event": "check-in",
            "criteria": {"$timePeriod": {"periodType": "day", "count": {"$gte": 1}}},
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert_eq!(outcome.metadata["unique_period_count"], json!(1));
    }

    /// `$timeWindow` (spec.md §4.5.6): `last` narrows the nested flow's event
    /// scope to a half-open window ending at the clock instant, so events
    /// outside it never reach the inner selector's count.
    #[tokio::test]
    async fn time_window_last_narrows_nested_flow_to_recent_events() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";

        for days_ago in [1, 5, 10] {
            repo.seed_event(
                user,
                "user_activity",
                clock.0 - ChronoDuration::days(days_ago),
                json!({}),
            );
        }
        repo.seed_event(
            user,
            "user_activity",
            clock.0 - ChronoDuration::days(40),
            json!({}),
        );

        let criteria = json!({
            "$timeWindow": {
                "last": "30d",
                "flow": {"event": "user_activity", "criteria": {"count": {"$gte": 4}}},
            }
        });

        let outcome = evaluate(&criteria, user, &clock, &repo).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.metadata["matched_count"], json!(3));
        assert_eq!(outcome.metadata["total_count"], json!(3));
    }

    /// AND identity and OR-with-false (spec.md §8).
    #[tokio::test]
    async fn and_identity_and_or_with_false() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";
        repo.seed_event(user, "bug-report", clock.0, json!({"status": "fixed"}));

        let leaf = json!({"event": "bug-report", "criteria": {"status": "fixed", "count": {"$gte": 1}}});
        let wrapped_and = json!({"$and": [leaf.clone()]});
        let false_leaf = json!({"event": "bug-report", "criteria": {"status": "nonexistent", "count": {"$gte": 1}}});
        let wrapped_or = json!({"$or": [leaf.clone(), false_leaf]});

        let plain = evaluate(&leaf, user, &clock, &repo).await.unwrap();
        let anded = evaluate(&wrapped_and, user, &clock, &repo).await.unwrap();
        let ored = evaluate(&wrapped_or, user, &clock, &repo).await.unwrap();

        assert_eq!(plain.result, anded.result);
        assert_eq!(plain.result, ored.result);
        assert!(plain.result);
    }

    /// NOT double-negation (spec.md §8).
    #[tokio::test]
    async fn not_double_negation_is_identity() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();
        let user = "user-1";
        repo.seed_event(user, "bug-report", clock.0, json!({"status": "fixed"}));

        let leaf = json!({"event": "bug-report", "criteria": {"status": "fixed", "count": {"$gte": 1}}});
        let double_negated = json!({"$not": {"$not": leaf.clone()}});

        let plain = evaluate(&leaf, user, &clock, &repo).await.unwrap();
        let negated_twice = evaluate(&double_negated, user, &clock, &repo).await.unwrap();
        assert_eq!(plain.result, negated_twice.result);
    }

    /// Boundary behavior: an empty event set evaluates a time operator to
    /// `false`, never an error.
    #[tokio::test]
    async fn empty_event_set_is_false_not_error() {
        let repo = InMemoryRepository::new();
        let clock = fixed_clock();

        let criteria = json!({
            "event": "check-in",
            "criteria": {"$timePeriod": {"periodType": "day", "count": {"$gte": 1}}},
        });

        // The event type is registered but no user ever logged one.
        repo.register_event_type("check-in");
        let outcome = evaluate(&criteria, "nobody", &clock, &repo).await.unwrap();
        assert!(!outcome.result);
        assert_eq!(outcome.metadata["unique_period_count"], json!(0));
    }
}
