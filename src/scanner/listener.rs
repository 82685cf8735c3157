use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::types::{Event, ScannerStatus, Signal};

/// Outward notifications. Called synchronously from the scanner worker and
/// never retried, so implementations should return quickly.
pub trait ScannerListener: Send + Sync {
    fn on_event_update(&self, _event: &Event) {}

    fn on_signal(&self, _signal: &Signal) {}

    /// Also fired once per monitoring tick with `Connected` as a liveness pulse.
    fn on_status_change(&self, _status: ScannerStatus) {}
}

pub struct NoopListener;

impl ScannerListener for NoopListener {}

/// Writes notifications to the log. Status is only logged when it changes.
#[derive(Default)]
pub struct LogListener {
    last_status: Mutex<Option<ScannerStatus>>,
}

impl LogListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScannerListener for LogListener {
    fn on_event_update(&self, event: &Event) {
        debug!(
            match_id = %event.match_id,
            lifecycle = %event.lifecycle_status,
            status = %event.status,
            points = event.score_points_current_set.as_deref().unwrap_or("-"),
            "[EVENT] {} vs {}",
            event.players.p1,
            event.players.p2,
        );
    }

    fn on_signal(&self, signal: &Signal) {
        info!(
            event = "SIGNAL",
            match_id = %signal.match_id,
            reason = %signal.reason,
            fired_at = signal.fired_at,
            "SIGNAL | match: {} | reason: {}",
            signal.match_id,
            signal.reason,
        );
    }

    fn on_status_change(&self, status: ScannerStatus) {
        let Ok(mut last) = self.last_status.lock() else {
            return;
        };
        if *last == Some(status) {
            return;
        }
        *last = Some(status);
        match status {
            ScannerStatus::Error => warn!(status = %status, "[SCANNER] status changed"),
            _ => info!(status = %status, "[SCANNER] status changed"),
        }
    }
}
