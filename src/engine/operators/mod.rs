//! The seven time/aggregation operators (spec.md §4.5), each a pure
//! function over an in-scope event list (or, for `$duration`/`$sequence`,
//! over the repository directly since they pair or order events the
//! enclosing selector never selected).

pub mod aggregate;
pub mod duration;
pub mod gap;
pub mod pattern;
pub mod sequence;
pub mod time_period;
pub mod time_window;
