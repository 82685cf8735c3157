use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::config::RECENT_SIGNALS_CAPACITY;
use crate::types::{Event, LifecycleStatus, Signal};

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

/// Registries for every match the scanner has observed.
///
/// Writes come from the scanner worker only; the maps are concurrent so the
/// status API and the `Scanner` accessors can read while the worker runs.
pub struct EventStore {
    /// match_id → latest canonical event
    events: DashMap<String, Event>,
    /// match_id → last signal that actually fired
    last_signal: DashMap<String, Signal>,
    /// match_id → unix seconds when that signal fired
    signal_cooldown_at: DashMap<String, f64>,
    /// Fired signals, newest last.
    recent_signals: Mutex<VecDeque<Signal>>,
}

impl EventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_event(&self, match_id: &str) -> Option<Event> {
        self.events.get(match_id).map(|e| e.clone())
    }

    /// Insert or replace the record for `event.match_id`.
    pub fn upsert_event(&self, event: Event) {
        self.events.insert(event.match_id.clone(), event);
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Matches that are neither STALE nor FINISHED.
    pub fn active_count(&self) -> usize {
        self.events
            .iter()
            .filter(|e| e.lifecycle_status.is_active())
            .count()
    }

    /// Defensive copy of the whole registry.
    pub fn events_snapshot(&self) -> HashMap<String, Event> {
        self.events
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    // -----------------------------------------------------------------------
    // Signals and cooldown
    // -----------------------------------------------------------------------

    /// True when `reason` already fired for this match less than
    /// `cooldown_secs` ago. A different reason is never suppressed.
    pub fn in_cooldown(&self, match_id: &str, reason: &str, now: f64, cooldown_secs: f64) -> bool {
        let Some(prev) = self.last_signal.get(match_id) else {
            return false;
        };
        let Some(fired_at) = self.signal_cooldown_at.get(match_id).map(|t| *t) else {
            return false;
        };
        now - fired_at < cooldown_secs && prev.reason == reason
    }

    pub fn record_signal(&self, signal: Signal, now: f64) {
        self.signal_cooldown_at.insert(signal.match_id.clone(), now);
        self.last_signal.insert(signal.match_id.clone(), signal.clone());

        if let Ok(mut recent) = self.recent_signals.lock() {
            if recent.len() >= RECENT_SIGNALS_CAPACITY {
                recent.pop_front();
            }
            recent.push_back(signal);
        }
    }

    pub fn last_signal_for(&self, match_id: &str) -> Option<Signal> {
        self.last_signal.get(match_id).map(|s| s.clone())
    }

    /// The signal with the most recent cooldown stamp across all matches.
    pub fn latest_signal(&self) -> Option<Signal> {
        let newest = self
            .signal_cooldown_at
            .iter()
            .max_by(|a, b| a.value().total_cmp(b.value()))
            .map(|entry| entry.key().clone())?;
        self.last_signal_for(&newest)
    }

    /// Up to `limit` fired signals, newest first.
    pub fn recent_signals(&self, limit: usize) -> Vec<Signal> {
        self.recent_signals
            .lock()
            .map(|recent| recent.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Housekeeping
    // -----------------------------------------------------------------------

    /// Mark STALE every event whose last update is older than `stale_after_secs`.
    /// Returns the events that changed so the caller can notify once per transition.
    /// FINISHED matches are already inactive and keep their status.
    pub fn mark_stale(&self, now: f64, stale_after_secs: f64) -> Vec<Event> {
        let mut changed = Vec::new();
        for mut entry in self.events.iter_mut() {
            let event = entry.value_mut();
            if matches!(
                event.lifecycle_status,
                LifecycleStatus::Stale | LifecycleStatus::Finished
            ) {
                continue;
            }
            let Some(updated) = event.last_update_ts else {
                continue;
            };
            if now - updated > stale_after_secs {
                event.lifecycle_status = LifecycleStatus::Stale;
                changed.push(event.clone());
            }
        }
        changed
    }

    /// Drop inactive matches not seen for `retention_secs`, with their signal
    /// and cooldown entries. Returns the evicted match ids.
    pub fn evict_inactive(&self, now: f64, retention_secs: f64) -> Vec<String> {
        let expired: Vec<String> = self
            .events
            .iter()
            .filter(|e| !e.lifecycle_status.is_active())
            .filter(|e| {
                let seen = e.last_seen.or(e.last_update_ts).unwrap_or(now);
                now - seen > retention_secs
            })
            .map(|e| e.key().clone())
            .collect();

        for match_id in &expired {
            self.events.remove(match_id);
            self.last_signal.remove(match_id);
            self.signal_cooldown_at.remove(match_id);
        }
        expired
    }
}

impl Default for EventStore {
    fn default() -> Self {
        Self {
            events: DashMap::new(),
            last_signal: DashMap::new(),
            signal_cooldown_at: DashMap::new(),
            recent_signals: Mutex::new(VecDeque::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
