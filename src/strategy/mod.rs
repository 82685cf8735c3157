pub mod point_gap;

pub use point_gap::PointGapStrategy;

use crate::types::{Event, Signal};

/// Decides whether an event is worth alerting on.
///
/// Implementations must be pure: the scanner may call `check_signal` for the
/// same match many times per second and relies on it having no side effects.
pub trait Strategy: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &'static str;

    fn check_signal(&self, event: &Event) -> Option<Signal>;
}

/// Parse a `"p1:p2"` score string into integers.
pub fn parse_score(score: &str) -> Option<(i64, i64)> {
    let (p1, p2) = score.split_once(':')?;
    Some((p1.trim().parse().ok()?, p2.trim().parse().ok()?))
}

/// Absolute point difference. Never overflows, even for `i64::MIN` against
/// `i64::MAX`.
pub fn score_gap(p1: i64, p2: i64) -> u64 {
    p1.abs_diff(p2)
}
