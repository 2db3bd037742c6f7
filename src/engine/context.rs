use chrono::{DateTime, Utc};

/// Threaded through one criteria evaluation: the user being evaluated, the
/// single frozen clock instant, and the half-open time window narrowed by
/// the nearest enclosing `$timeWindow`, if any.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub user: String,
    pub now: DateTime<Utc>,
    pub window_lower: Option<DateTime<Utc>>,
    pub window_upper: Option<DateTime<Utc>>,
    pub exclude_weekends: bool,
}

impl EvalContext {
    pub fn new(user: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user: user.into(),
            now,
            window_lower: None,
            window_upper: None,
            exclude_weekends: false,
        }
    }

    /// Narrows the window for a nested flow. `$timeWindow` bounds are
    /// absolute, not intersected with any enclosing window: a window scopes
    /// strictly to its own nested `flow`. `businessDaysOnly` additionally
    /// excludes weekend occurrences from every selector inside the nested
    /// flow.
    pub fn narrowed(
        &self,
        lower: Option<DateTime<Utc>>,
        upper: Option<DateTime<Utc>>,
        exclude_weekends: bool,
    ) -> Self {
        Self {
            user: self.user.clone(),
            now: self.now,
            window_lower: lower,
            window_upper: upper,
            exclude_weekends,
        }
    }
}
