use chrono::{DateTime, Utc};

/// Injected source of "now". No module reads the wall clock directly; a
/// single evaluation calls `now()` exactly once and threads the result
/// through the whole criteria tree so every `$NOW` token and every time
/// operator sees the same instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test double returning a fixed instant, used by engine unit tests so
/// `$NOW` resolution is deterministic.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
