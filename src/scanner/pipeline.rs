//! Per-payload processing and the periodic housekeeping tick.
//!
//! A `Pipeline` is owned by exactly one worker task, so every registry
//! mutation for a scanner run happens in capture order on that task.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::api::health::HealthState;
use crate::config::{ScannerSettings, RATE_WINDOW_SECS};
use crate::normalizer::{normalize_event, normalize_events_list};
use crate::scanner::listener::ScannerListener;
use crate::state::EventStore;
use crate::strategy::{parse_score, score_gap, Strategy};
use crate::types::{Event, LifecycleStatus, ScannerStatus, Signal};

/// What happened to one observed event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// No match id; nothing was stored.
    Dropped,
    /// Stored without a strategy signal. Carries the resolved lifecycle.
    Updated(LifecycleStatus),
    Fired(Signal),
    /// Same reason repeated inside the cooldown window.
    Suppressed(Signal),
}

pub struct Pipeline {
    store: Arc<EventStore>,
    strategy: Arc<dyn Strategy>,
    listener: Arc<dyn ScannerListener>,
    health: Arc<HealthState>,
    settings: ScannerSettings,
    /// Processing times (unix seconds) inside the rate window.
    rate_window: VecDeque<f64>,
}

impl Pipeline {
    pub fn new(
        store: Arc<EventStore>,
        strategy: Arc<dyn Strategy>,
        listener: Arc<dyn ScannerListener>,
        health: Arc<HealthState>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            store,
            strategy,
            listener,
            health,
            settings,
            rate_window: VecDeque::new(),
        }
    }

    /// Normalize a captured payload and process every event found in it.
    /// Returns how many events were processed.
    pub fn handle_network_data(&mut self, raw: &Value, now: f64) -> usize {
        let root = payload_root(raw);
        let mut events = extract_events(root);
        if events.is_empty() && !std::ptr::eq(root, raw) {
            events = extract_events(raw);
        }
        if events.is_empty() {
            debug!("[SCANNER] payload carried no events");
            return 0;
        }

        let count = events.len();
        for event in events {
            self.process_event(event, now);
        }
        count
    }

    pub fn process_event(&mut self, mut event: Event, now: f64) -> ProcessOutcome {
        if event.match_id.is_empty() {
            return ProcessOutcome::Dropped;
        }

        if let Some(prev) = self.store.get_event(&event.match_id) {
            event.absorb_previous(&prev);
        }
        event.last_update_ts.get_or_insert(now);
        event.last_seen = Some(now);
        event.lifecycle_status = LifecycleStatus::from_status(event.status);

        self.rate_window.push_back(now);
        self.health.inc_events_processed();

        let outcome = match self.strategy.check_signal(&event) {
            Some(signal) => self.resolve_signal(&mut event, signal, now),
            None => {
                if self.is_candidate(&event) {
                    event.lifecycle_status = LifecycleStatus::Candidate;
                }
                ProcessOutcome::Updated(event.lifecycle_status)
            }
        };

        self.store.upsert_event(event.clone());
        if let ProcessOutcome::Fired(signal) = &outcome {
            self.listener.on_signal(signal);
        }
        self.listener.on_event_update(&event);
        outcome
    }

    fn resolve_signal(&self, event: &mut Event, mut signal: Signal, now: f64) -> ProcessOutcome {
        signal.match_id.clone_from(&event.match_id);

        let suppressed = self.store.in_cooldown(
            &event.match_id,
            &signal.reason,
            now,
            self.settings.signal_cooldown_secs,
        );
        if suppressed {
            signal.reason.push_str(" (cooldown)");
            event.lifecycle_status = LifecycleStatus::Candidate;
            self.health.inc_signals_suppressed();
            debug!(match_id = %event.match_id, reason = %signal.reason, "[SCANNER] signal suppressed");
            return ProcessOutcome::Suppressed(signal);
        }

        signal.fired_at = Some(now);
        self.store.record_signal(signal.clone(), now);
        event.lifecycle_status = LifecycleStatus::Signal;
        self.health.inc_signals_fired();
        info!(
            match_id = %event.match_id,
            reason = %signal.reason,
            strategy = self.strategy.name(),
            "[SCANNER] signal fired"
        );
        ProcessOutcome::Fired(signal)
    }

    /// Current-set point gap inside the configured band.
    pub fn is_candidate(&self, event: &Event) -> bool {
        let Some((p1, p2)) = event
            .score_points_current_set
            .as_deref()
            .and_then(parse_score)
        else {
            return false;
        };
        // A gap past i64::MAX is outside any configurable band.
        i64::try_from(score_gap(p1, p2)).is_ok_and(|gap| {
            gap >= self.settings.candidate_min_gap && gap <= self.settings.candidate_max_gap
        })
    }

    /// One monitoring tick: staleness sweep, rate metric, optional eviction,
    /// liveness pulse. The pulse goes to the listener only; the health mirror
    /// keeps whatever `start`/`reconnect` last reported.
    pub fn tick(&mut self, now: f64) {
        for event in self.store.mark_stale(now, self.settings.stale_after_secs) {
            debug!(match_id = %event.match_id, "[MONITOR] match went stale");
            self.listener.on_event_update(&event);
        }

        while self
            .rate_window
            .front()
            .is_some_and(|t| now - t > RATE_WINDOW_SECS)
        {
            self.rate_window.pop_front();
        }
        self.health.set_events_per_minute(self.rate_window.len() as u64);

        if let Some(retention) = self.settings.retention_secs {
            let evicted = self.store.evict_inactive(now, retention);
            if !evicted.is_empty() {
                info!(count = evicted.len(), "[MONITOR] evicted inactive matches");
            }
        }

        self.listener.on_status_change(ScannerStatus::Connected);
    }
}

/// `raw.data`, then `raw.payload`, then `raw` itself. Only containers count.
fn payload_root(raw: &Value) -> &Value {
    ["data", "payload"]
        .iter()
        .filter_map(|key| raw.get(key))
        .find(|v| v.is_object() || v.is_array())
        .unwrap_or(raw)
}

fn extract_events(root: &Value) -> Vec<Event> {
    let events = normalize_events_list(root);
    if !events.is_empty() {
        return events;
    }
    normalize_event(root).into_iter().collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::strategy::PointGapStrategy;
    use crate::types::MatchStatus;

    #[derive(Default)]
    pub(crate) struct RecordingListener {
        pub updates: Mutex<Vec<Event>>,
        pub signals: Mutex<Vec<Signal>>,
        pub statuses: Mutex<Vec<ScannerStatus>>,
    }

    impl ScannerListener for RecordingListener {
        fn on_event_update(&self, event: &Event) {
            self.updates.lock().unwrap().push(event.clone());
        }

        fn on_signal(&self, signal: &Signal) {
            self.signals.lock().unwrap().push(signal.clone());
        }

        fn on_status_change(&self, status: ScannerStatus) {
            self.statuses.lock().unwrap().push(status);
        }
    }

    /// Fires with whatever reason is currently set.
    #[derive(Default)]
    pub(crate) struct ScriptedStrategy {
        pub reason: Mutex<Option<String>>,
    }

    impl ScriptedStrategy {
        pub fn set(&self, reason: Option<&str>) {
            *self.reason.lock().unwrap() = reason.map(str::to_string);
        }
    }

    impl Strategy for ScriptedStrategy {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn check_signal(&self, event: &Event) -> Option<Signal> {
            let reason = self.reason.lock().unwrap().clone()?;
            Some(Signal::new(event.match_id.clone(), reason))
        }
    }

    struct Harness {
        pipeline: Pipeline,
        store: Arc<EventStore>,
        health: Arc<HealthState>,
        strategy: Arc<ScriptedStrategy>,
        listener: Arc<RecordingListener>,
    }

    fn harness(settings: ScannerSettings) -> Harness {
        let store = EventStore::new();
        let health = Arc::new(HealthState::new());
        let strategy = Arc::new(ScriptedStrategy::default());
        let listener = Arc::new(RecordingListener::default());
        let pipeline = Pipeline::new(
            Arc::clone(&store),
            strategy.clone(),
            listener.clone(),
            Arc::clone(&health),
            settings,
        );
        Harness { pipeline, store, health, strategy, listener }
    }

    fn live(id: &str, points: Option<&str>) -> Event {
        let mut e = Event::new(id);
        e.status = MatchStatus::Live;
        e.score_points_current_set = points.map(str::to_string);
        e
    }

    #[test]
    fn repeated_reason_inside_cooldown_is_suppressed() {
        let mut h = harness(ScannerSettings::default());
        h.strategy.set(Some("gap>=3"));

        let first = h.pipeline.process_event(live("m3", None), 1000.0);
        assert!(matches!(first, ProcessOutcome::Fired(ref s) if s.reason == "gap>=3"));
        assert_eq!(h.store.get_event("m3").unwrap().lifecycle_status, LifecycleStatus::Signal);

        let second = h.pipeline.process_event(live("m3", None), 1010.0);
        match second {
            ProcessOutcome::Suppressed(s) => assert_eq!(s.reason, "gap>=3 (cooldown)"),
            other => panic!("expected suppression, got {other:?}"),
        }
        assert_eq!(h.store.get_event("m3").unwrap().lifecycle_status, LifecycleStatus::Candidate);
        assert_eq!(h.listener.signals.lock().unwrap().len(), 1);
        assert_eq!(h.listener.updates.lock().unwrap().len(), 2);
        assert_eq!(h.health.snapshot().signals_suppressed, 1);

        let last = h.store.latest_signal().unwrap();
        assert_eq!(last.reason, "gap>=3");
        assert_eq!(last.fired_at, Some(1000.0));
    }

    #[test]
    fn changed_reason_fires_inside_cooldown() {
        let mut h = harness(ScannerSettings::default());
        h.strategy.set(Some("gap>=3"));
        h.pipeline.process_event(live("m", None), 0.0);

        h.strategy.set(Some("gap>=4"));
        let outcome = h.pipeline.process_event(live("m", None), 5.0);
        assert!(matches!(outcome, ProcessOutcome::Fired(_)));
        assert_eq!(h.listener.signals.lock().unwrap().len(), 2);
    }

    #[test]
    fn same_reason_fires_again_after_cooldown() {
        let mut h = harness(ScannerSettings::default());
        h.strategy.set(Some("gap>=3"));
        h.pipeline.process_event(live("m", None), 0.0);
        let outcome = h.pipeline.process_event(live("m", None), 180.0);
        assert!(matches!(outcome, ProcessOutcome::Fired(_)));
    }

    #[test]
    fn candidate_band() {
        let mut h = harness(ScannerSettings::default());
        assert_eq!(
            h.pipeline.process_event(live("a", Some("7:4")), 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Candidate)
        );
        assert_eq!(
            h.pipeline.process_event(live("b", Some("7:1")), 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Watch)
        );
        assert_eq!(
            h.pipeline.process_event(live("c", Some("3:3")), 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Watch)
        );
        assert_eq!(
            h.pipeline.process_event(live("d", Some("ad:40")), 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Watch)
        );

        let mut close = live("e", Some("7:5"));
        close.status = MatchStatus::Finished;
        assert_eq!(
            h.pipeline.process_event(close, 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Candidate)
        );

        let mut done = live("f", Some("6:0"));
        done.status = MatchStatus::Finished;
        assert_eq!(
            h.pipeline.process_event(done, 0.0),
            ProcessOutcome::Updated(LifecycleStatus::Finished)
        );
    }

    #[test]
    fn extreme_scores_are_stored_not_fatal() {
        let store = EventStore::new();
        let listener = Arc::new(RecordingListener::default());
        let mut pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::new(PointGapStrategy::new(6)),
            listener.clone(),
            Arc::new(HealthState::new()),
            ScannerSettings::default(),
        );

        let n = pipeline.handle_network_data(
            &json!({"id": "x", "status": "live", "currentSet": {"p1": 9e18, "p2": -9e18}}),
            0.0,
        );
        assert_eq!(n, 1);
        let stored = store.get_event("x").unwrap();
        assert_eq!(
            stored.score_points_current_set.as_deref(),
            Some("9000000000000000000:-9000000000000000000")
        );
        assert_eq!(stored.lifecycle_status, LifecycleStatus::Signal);
        assert_eq!(listener.signals.lock().unwrap()[0].reason, "p1 gap>=6");

        let widest = format!("{}:{}", i64::MIN, i64::MAX);
        assert!(!pipeline.is_candidate(&live("y", Some(widest.as_str()))));
        let lowest = format!("{}:0", i64::MIN);
        assert!(!pipeline.is_candidate(&live("y", Some(lowest.as_str()))));
    }

    #[test]
    fn candidate_band_is_configurable() {
        let settings = ScannerSettings {
            candidate_min_gap: 2,
            candidate_max_gap: 3,
            ..ScannerSettings::default()
        };
        let h = harness(settings);
        assert!(!h.pipeline.is_candidate(&live("a", Some("5:4"))));
        assert!(h.pipeline.is_candidate(&live("a", Some("5:2"))));
        assert!(!h.pipeline.is_candidate(&live("a", Some("6:2"))));
        assert!(!h.pipeline.is_candidate(&live("a", None)));
    }

    #[test]
    fn stale_after_sixty_one_seconds_fires_once() {
        let mut h = harness(ScannerSettings::default());
        h.pipeline.process_event(live("m4", None), 1000.0);
        h.listener.updates.lock().unwrap().clear();

        h.pipeline.tick(1061.0);
        assert_eq!(h.store.get_event("m4").unwrap().lifecycle_status, LifecycleStatus::Stale);
        assert_eq!(h.listener.updates.lock().unwrap().len(), 1);

        h.pipeline.tick(1062.0);
        assert_eq!(h.listener.updates.lock().unwrap().len(), 1);
        assert_eq!(h.store.active_count(), 0);
    }

    #[test]
    fn fresh_update_revives_stale_match() {
        let mut h = harness(ScannerSettings::default());
        h.pipeline.process_event(live("m", None), 0.0);
        h.pipeline.tick(100.0);
        assert_eq!(h.store.active_count(), 0);

        h.pipeline.process_event(live("m", None), 101.0);
        assert_eq!(h.store.get_event("m").unwrap().lifecycle_status, LifecycleStatus::Watch);
        assert_eq!(h.store.active_count(), 1);
    }

    #[test]
    fn source_timestamp_is_kept() {
        let mut h = harness(ScannerSettings::default());
        let mut e = live("m", None);
        e.last_update_ts = Some(500.0);
        h.pipeline.process_event(e, 900.0);
        let stored = h.store.get_event("m").unwrap();
        assert_eq!(stored.last_update_ts, Some(500.0));
        assert_eq!(stored.last_seen, Some(900.0));
    }

    #[test]
    fn tick_pulses_connected_and_prunes_rate_window() {
        let mut h = harness(ScannerSettings::default());
        h.pipeline.process_event(live("a", None), 0.0);
        h.pipeline.process_event(live("b", None), 30.0);
        h.pipeline.process_event(live("c", None), 61.0);

        h.pipeline.tick(61.0);
        assert_eq!(h.health.snapshot().events_per_minute, 2);
        assert_eq!(*h.listener.statuses.lock().unwrap(), vec![ScannerStatus::Connected]);
    }

    #[test]
    fn tick_leaves_reported_error_in_health() {
        let mut h = harness(ScannerSettings::default());
        h.health.set_status(ScannerStatus::Error);

        h.pipeline.tick(10.0);
        h.pipeline.tick(11.0);
        assert_eq!(h.health.status(), Some(ScannerStatus::Error));
        assert_eq!(h.listener.statuses.lock().unwrap().len(), 2);
    }

    #[test]
    fn active_count_matches_lifecycle() {
        let mut h = harness(ScannerSettings::default());
        h.pipeline.process_event(live("a", None), 100.0);
        h.pipeline.process_event(live("b", Some("2:1")), 100.0);
        let mut done = live("c", None);
        done.status = MatchStatus::Finished;
        h.pipeline.process_event(done, 100.0);
        h.pipeline.process_event(live("d", None), 10.0);
        h.pipeline.tick(100.0);

        let expected = h
            .store
            .events_snapshot()
            .values()
            .filter(|e| {
                !matches!(e.lifecycle_status, LifecycleStatus::Stale | LifecycleStatus::Finished)
            })
            .count();
        assert_eq!(h.store.active_count(), expected);
        assert_eq!(expected, 2);
    }

    #[test]
    fn partial_update_keeps_known_fields() {
        let mut h = harness(ScannerSettings::default());
        h.pipeline.handle_network_data(
            &json!({"id": "m", "status": "live", "home": {"name": "A"}, "away": {"name": "B"}}),
            0.0,
        );
        h.pipeline
            .handle_network_data(&json!({"id": "m", "current_set": {"points1": 15, "points2": 0}}), 1.0);

        let stored = h.store.get_event("m").unwrap();
        assert_eq!(stored.players.p1, "A");
        assert_eq!(stored.status, MatchStatus::Live);
        assert_eq!(stored.score_points_current_set.as_deref(), Some("15:0"));
    }

    #[test]
    fn payload_root_selection() {
        let mut h = harness(ScannerSettings::default());
        let n = h
            .pipeline
            .handle_network_data(&json!({"data": {"events": [{"id": "a"}, {"id": "b"}]}}), 0.0);
        assert_eq!(n, 2);

        assert_eq!(h.pipeline.handle_network_data(&json!({"payload": {"id": "c"}}), 0.0), 1);
        assert_eq!(h.pipeline.handle_network_data(&json!([{"id": "d"}, 7]), 0.0), 1);

        // `data` holds no events but the envelope itself is an event
        assert_eq!(h.pipeline.handle_network_data(&json!({"data": {"x": 1}, "id": "e"}), 0.0), 1);

        assert_eq!(h.pipeline.handle_network_data(&json!({"ok": true}), 0.0), 0);
        assert_eq!(h.pipeline.handle_network_data(&json!("ping"), 0.0), 0);
        assert_eq!(h.store.event_count(), 5);
    }

    #[test]
    fn reference_strategy_end_to_end() {
        let store = EventStore::new();
        let listener = Arc::new(RecordingListener::default());
        let mut pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::new(PointGapStrategy::new(6)),
            listener.clone(),
            Arc::new(HealthState::new()),
            ScannerSettings::default(),
        );
        pipeline.handle_network_data(
            &json!({"events": [{"id": "m", "status": "live", "score": {"current": {"p1": 8, "p2": 1}}}]}),
            0.0,
        );
        let signals = listener.signals.lock().unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].reason, "p1 gap>=6");
    }

    #[test]
    fn retention_evicts_old_inactive_matches() {
        let settings = ScannerSettings {
            retention_secs: Some(300.0),
            ..ScannerSettings::default()
        };
        let mut h = harness(settings);
        h.pipeline.process_event(live("old", None), 0.0);
        h.pipeline.tick(100.0);
        assert!(h.store.get_event("old").is_some());
        h.pipeline.tick(301.0);
        assert!(h.store.get_event("old").is_none());
    }
}
