/// Error taxonomy for the criteria interpreter. These are *kinds*, not wire
/// types: each carries the dotted path within the criteria tree where the
/// failure occurred, so the orchestrator can log `badge_id`, `user_id`, and
/// path together and then contain the failure without blocking any other
/// badge's evaluation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("invalid criteria at {path}: {reason}")]
    InvalidCriteria { path: String, reason: String },

    #[error("unresolved event type {name:?} at {path}")]
    UnresolvedEventType { path: String, name: String },

    #[error("storage failure at {path}: {reason}")]
    StorageFailure { path: String, reason: String },

    #[error("evaluation timed out at {path}")]
    Timeout { path: String },

    #[error("internal invariant violated at {path}: {reason}")]
    InternalInvariantViolation { path: String, reason: String },
}

impl EngineError {
    pub fn invalid(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCriteria {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn unresolved_event_type(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnresolvedEventType {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn storage(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StorageFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn timeout(path: impl Into<String>) -> Self {
        Self::Timeout { path: path.into() }
    }

    pub fn invariant(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InternalInvariantViolation {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The dotted path within the criteria tree this error occurred at.
    pub fn path(&self) -> &str {
        match self {
            Self::InvalidCriteria { path, .. }
            | Self::UnresolvedEventType { path, .. }
            | Self::StorageFailure { path, .. }
            | Self::Timeout { path }
            | Self::InternalInvariantViolation { path, .. } => path,
        }
    }
}
