use crate::strategy::{parse_score, score_gap, Strategy};
use crate::types::{Event, MatchStatus, Signal};

/// Reference strategy: fires when one side leads the current set by at least
/// `min_gap` points in a live match.
///
/// The reason names the leader so that a lead changing hands counts as a new
/// condition for cooldown purposes.
pub struct PointGapStrategy {
    min_gap: i64,
}

impl PointGapStrategy {
    pub fn new(min_gap: i64) -> Self {
        Self { min_gap: min_gap.max(1) }
    }
}

impl Strategy for PointGapStrategy {
    fn name(&self) -> &'static str {
        "point_gap"
    }

    fn check_signal(&self, event: &Event) -> Option<Signal> {
        if event.status != MatchStatus::Live {
            return None;
        }
        let (p1, p2) = parse_score(event.score_points_current_set.as_deref()?)?;
        if score_gap(p1, p2) < self.min_gap.unsigned_abs() {
            return None;
        }
        let leader = if p1 > p2 { "p1" } else { "p2" };
        Some(Signal::new(
            event.match_id.clone(),
            format!("{leader} gap>={}", self.min_gap),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(points: &str) -> Event {
        let mut e = Event::new("m1");
        e.status = MatchStatus::Live;
        e.score_points_current_set = Some(points.to_string());
        e
    }

    #[test]
    fn fires_at_threshold() {
        let s = PointGapStrategy::new(6);
        let signal = s.check_signal(&live("8:2")).expect("signal");
        assert_eq!(signal.match_id, "m1");
        assert_eq!(signal.reason, "p1 gap>=6");
        assert!(signal.fired_at.is_none());
    }

    #[test]
    fn below_threshold_is_silent() {
        let s = PointGapStrategy::new(6);
        assert!(s.check_signal(&live("7:2")).is_none());
    }

    #[test]
    fn leader_is_part_of_reason() {
        let s = PointGapStrategy::new(3);
        assert_eq!(s.check_signal(&live("1:4")).unwrap().reason, "p2 gap>=3");
    }

    #[test]
    fn ignores_non_live_and_unparseable() {
        let s = PointGapStrategy::new(3);
        let mut paused = live("9:0");
        paused.status = MatchStatus::Paused;
        assert!(s.check_signal(&paused).is_none());
        assert!(s.check_signal(&live("x:0")).is_none());
        assert!(s.check_signal(&Event::new("m2")).is_none());
    }

    #[test]
    fn extreme_scores_do_not_overflow() {
        let s = PointGapStrategy::new(6);
        let wide = live(&format!("{}:{}", i64::MAX, i64::MIN));
        assert_eq!(s.check_signal(&wide).unwrap().reason, "p1 gap>=6");

        let low = live(&format!("{}:0", i64::MIN));
        assert_eq!(s.check_signal(&low).unwrap().reason, "p2 gap>=6");

        assert!(s.check_signal(&live(&format!("{0}:{0}", i64::MIN))).is_none());
    }
}
