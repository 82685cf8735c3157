//! Shared health state for the /health endpoint.
//! Updated by the Scanner and its worker, read by the API and the feed watchdog.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use serde::Serialize;

use crate::types::ScannerStatus;

#[derive(Default)]
pub struct HealthState {
    /// True between a successful `start()` and `stop()`.
    pub running: AtomicBool,
    /// Last status pushed to listeners (0 = none yet).
    status: AtomicU8,
    pub payloads_received: AtomicU64,
    pub payloads_dropped: AtomicU64,
    pub events_processed: AtomicU64,
    pub signals_fired: AtomicU64,
    pub signals_suppressed: AtomicU64,
    pub events_per_minute: AtomicU64,
    /// Millisecond unix timestamp of the last captured payload (0 = none).
    pub last_payload_at_ms: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub running: bool,
    pub status: Option<ScannerStatus>,
    pub payloads_received: u64,
    pub payloads_dropped: u64,
    pub events_processed: u64,
    pub signals_fired: u64,
    pub signals_suppressed: u64,
    pub events_per_minute: u64,
    pub last_payload_at_ms: Option<u64>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, v: bool) {
        self.running.store(v, Ordering::Relaxed);
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn set_status(&self, status: ScannerStatus) {
        let code = match status {
            ScannerStatus::WaitingLogin => 1,
            ScannerStatus::Connected => 2,
            ScannerStatus::Error => 3,
        };
        self.status.store(code, Ordering::Relaxed);
    }

    pub fn status(&self) -> Option<ScannerStatus> {
        match self.status.load(Ordering::Relaxed) {
            1 => Some(ScannerStatus::WaitingLogin),
            2 => Some(ScannerStatus::Connected),
            3 => Some(ScannerStatus::Error),
            _ => None,
        }
    }

    pub fn record_payload(&self, at_ms: u64) {
        self.payloads_received.fetch_add(1, Ordering::Relaxed);
        self.last_payload_at_ms.store(at_ms, Ordering::Relaxed);
    }

    pub fn inc_payloads_dropped(&self) {
        self.payloads_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signals_fired(&self) {
        self.signals_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_signals_suppressed(&self) {
        self.signals_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_events_per_minute(&self, v: u64) {
        self.events_per_minute.store(v, Ordering::Relaxed);
    }

    pub fn last_payload_at_ms(&self) -> Option<u64> {
        match self.last_payload_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            running: self.running(),
            status: self.status(),
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            signals_fired: self.signals_fired.load(Ordering::Relaxed),
            signals_suppressed: self.signals_suppressed.load(Ordering::Relaxed),
            events_per_minute: self.events_per_minute.load(Ordering::Relaxed),
            last_payload_at_ms: self.last_payload_at_ms(),
        }
    }
}
