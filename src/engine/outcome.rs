use serde_json::Value;

/// The result of evaluating one criteria node: a boolean plus the metadata
/// object surfaced for debugging and auditing.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub result: bool,
    pub metadata: Value,
}

impl EvalOutcome {
    pub fn new(result: bool, metadata: Value) -> Self {
        Self { result, metadata }
    }
}
