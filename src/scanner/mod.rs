//! Scanner: which matches are being watched, what state they are in, and
//! whether they were already alerted on.
//!
//! Lifecycle calls (`start`, `stop`, `reconnect`) are serialized by an async
//! mutex. The registries are only mutated by the worker in [`monitor`]; the
//! accessors here read them concurrently.

pub mod listener;
pub mod monitor;
pub mod pipeline;

pub use listener::{LogListener, NoopListener, ScannerListener};
pub use pipeline::{Pipeline, ProcessOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::api::health::{HealthSnapshot, HealthState};
use crate::api::latency::LatencyStats;
use crate::browser::BrowserManager;
use crate::config::{ScannerSettings, CHANNEL_CAPACITY, RECONNECT_BACKOFF_SECS};
use crate::error::Result;
use crate::scanner::monitor::Captured;
use crate::state::EventStore;
use crate::strategy::Strategy;
use crate::types::{unix_now, Event, ScannerStatus, Signal};

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct Scanner {
    browser: Arc<dyn BrowserManager>,
    strategy: Arc<dyn Strategy>,
    listener: Arc<dyn ScannerListener>,
    store: Arc<EventStore>,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    settings: ScannerSettings,
    worker: Mutex<Option<Worker>>,
    /// Raised by `stop` before it takes the lifecycle lock, so a `start`
    /// parked on a login wall gives the lock up.
    stop_requested: watch::Sender<bool>,
}

impl Scanner {
    pub fn new(
        browser: Arc<dyn BrowserManager>,
        strategy: Arc<dyn Strategy>,
        listener: Arc<dyn ScannerListener>,
        settings: ScannerSettings,
    ) -> Self {
        Self {
            browser,
            strategy,
            listener,
            store: EventStore::new(),
            health: Arc::new(HealthState::new()),
            latency: Arc::new(LatencyStats::new()),
            settings,
            worker: Mutex::new(None),
            stop_requested: watch::channel(false).0,
        }
    }

    /// Attach the browser, wait out a login wall and launch the worker.
    /// Does nothing when already running.
    pub async fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        if self.health.running() {
            debug!("[SCANNER] start ignored, already running");
            return Ok(());
        }

        info!(strategy = self.strategy.name(), "[SCANNER] starting");
        if let Err(e) = self.browser.start().await {
            error!("[SCANNER] browser failed to start: {e}");
            self.notify_status(ScannerStatus::Error);
            return Err(e);
        }

        let (payload_tx, payload_rx) = mpsc::channel(CHANNEL_CAPACITY);
        self.register_callback(payload_tx);

        if let Err(e) = self.browser.navigate_to_live().await {
            error!("[SCANNER] could not open the live page: {e}");
            self.notify_status(ScannerStatus::Error);
            if let Err(stop_err) = self.browser.stop().await {
                warn!("[SCANNER] browser stop after failed start: {stop_err}");
            }
            return Err(e);
        }

        let mut stop_requested = self.stop_requested.subscribe();
        if !self.wait_for_login(&mut stop_requested).await {
            info!("[SCANNER] stop requested during login wait, start abandoned");
            if let Err(e) = self.browser.stop().await {
                warn!("[SCANNER] browser stop after abandoned start: {e}");
            }
            return Ok(());
        }

        self.health.set_running(true);
        self.notify_status(ScannerStatus::Connected);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = Pipeline::new(
            Arc::clone(&self.store),
            Arc::clone(&self.strategy),
            Arc::clone(&self.listener),
            Arc::clone(&self.health),
            self.settings.clone(),
        );
        let handle = tokio::spawn(monitor::run(
            pipeline,
            payload_rx,
            shutdown_rx,
            Arc::clone(&self.latency),
        ));
        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });

        info!("[SCANNER] running");
        Ok(())
    }

    /// Stop the worker and the browser. Safe to call repeatedly.
    pub async fn stop(&self) -> Result<()> {
        self.stop_requested.send_replace(true);
        let mut worker = self.worker.lock().await;
        self.stop_requested.send_replace(false);
        let was_running = self.health.running();
        self.health.set_running(false);

        if let Some(Worker { shutdown, handle }) = worker.take() {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                error!("[SCANNER] worker ended abnormally: {e}");
            }
        }

        if was_running {
            self.browser.stop().await?;
            info!("[SCANNER] stopped");
        }
        Ok(())
    }

    /// Re-attach the browser and reopen the live page, retrying with backoff
    /// until it works or the scanner is stopped.
    pub async fn reconnect(&self) {
        let mut attempt = 0usize;
        loop {
            {
                let _lifecycle = self.worker.lock().await;
                if !self.health.running() {
                    info!("[SCANNER] not running, reconnect abandoned");
                    return;
                }
                match self.reconnect_once().await {
                    Ok(()) => {
                        info!(attempt, "[SCANNER] reconnected");
                        self.notify_status(ScannerStatus::Connected);
                        return;
                    }
                    Err(e) => {
                        error!(attempt, "[SCANNER] reconnect failed: {e}");
                        self.notify_status(ScannerStatus::Error);
                    }
                }
            }

            let delay = reconnect_delay(attempt);
            attempt += 1;
            warn!("[SCANNER] retrying reconnect in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
        }
    }

    async fn reconnect_once(&self) -> Result<()> {
        self.browser.reconnect().await?;
        self.browser.navigate_to_live().await
    }

    pub fn is_running(&self) -> bool {
        self.health.running()
    }

    pub fn active_matches_count(&self) -> usize {
        self.store.active_count()
    }

    pub fn tracked_matches_count(&self) -> usize {
        self.store.event_count()
    }

    /// Copy of the whole registry.
    pub fn events(&self) -> HashMap<String, Event> {
        self.store.events_snapshot()
    }

    pub fn event(&self, match_id: &str) -> Option<Event> {
        self.store.get_event(match_id)
    }

    pub fn last_signal(&self) -> Option<Signal> {
        self.store.latest_signal()
    }

    /// Newest first.
    pub fn recent_signals(&self, limit: usize) -> Vec<Signal> {
        self.store.recent_signals(limit)
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.snapshot()
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    /// None until the first payload has been captured.
    pub fn seconds_since_last_payload(&self) -> Option<f64> {
        let last_ms = self.health.last_payload_at_ms()?;
        Some((unix_now_ms().saturating_sub(last_ms)) as f64 / 1000.0)
    }

    fn notify_status(&self, status: ScannerStatus) {
        self.health.set_status(status);
        self.listener.on_status_change(status);
    }

    fn register_callback(&self, payload_tx: mpsc::Sender<Captured>) {
        let health = Arc::clone(&self.health);
        self.browser
            .set_network_callback(Arc::new(move |payload: Value| {
                health.record_payload(unix_now_ms());
                match payload_tx.try_send(Captured::new(payload)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        health.inc_payloads_dropped();
                        warn!("[SCANNER] worker channel full, payload dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        health.inc_payloads_dropped();
                        debug!("[SCANNER] worker gone, payload dropped");
                    }
                }
            }));
    }

    /// Returns false when `stop` interrupted the wait.
    async fn wait_for_login(&self, stop_requested: &mut watch::Receiver<bool>) -> bool {
        match self.browser.check_login_required().await {
            Ok(false) => return true,
            Ok(true) => {}
            Err(e) => {
                warn!("[SCANNER] login check failed, assuming logged in: {e}");
                return true;
            }
        }

        warn!("[SCANNER] login required, waiting for a manual login in the browser");
        self.notify_status(ScannerStatus::WaitingLogin);

        let poll = Duration::from_secs(self.settings.login_poll_interval_secs);
        let deadline = Instant::now() + Duration::from_secs(self.settings.login_wait_timeout_secs);
        loop {
            if Instant::now() >= deadline {
                warn!(
                    "[SCANNER] still behind the login wall after {}s, continuing anyway",
                    self.settings.login_wait_timeout_secs
                );
                return true;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = stop_signalled(stop_requested) => return false,
            }
            match self.browser.check_login_required().await {
                Ok(false) => {
                    info!("[SCANNER] login detected");
                    return true;
                }
                Ok(true) => {}
                Err(e) => debug!("[SCANNER] login poll failed: {e}"),
            }
        }
    }
}

/// Resolves once the flag is raised. Pending forever if the sender is gone.
async fn stop_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Backoff before reconnect attempt `attempt + 1`. The last value repeats.
fn reconnect_delay(attempt: usize) -> Duration {
    let secs = RECONNECT_BACKOFF_SECS
        .get(attempt)
        .or_else(|| RECONNECT_BACKOFF_SECS.last())
        .copied()
        .unwrap_or(60);
    Duration::from_secs(secs)
}

fn unix_now_ms() -> u64 {
    (unix_now() * 1000.0) as u64
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::browser::NetworkCallback;
    use crate::error::AppError;
    use crate::scanner::pipeline::tests::{RecordingListener, ScriptedStrategy};
    use crate::types::LifecycleStatus;

    #[derive(Default)]
    struct FakeBrowser {
        callback: StdMutex<Option<NetworkCallback>>,
        fail_start: AtomicBool,
        login_walls: AtomicU32,
        reconnect_failures: AtomicU32,
        starts: AtomicU32,
        stops: AtomicU32,
        reconnects: AtomicU32,
    }

    impl FakeBrowser {
        fn emit(&self, payload: Value) {
            let cb = self.callback.lock().unwrap().clone();
            if let Some(cb) = cb {
                cb(payload);
            }
        }
    }

    #[async_trait]
    impl BrowserManager for FakeBrowser {
        async fn start(&self) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(AppError::Browser("no chrome".to_string()));
            }
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn reconnect(&self) -> Result<()> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            let left = self.reconnect_failures.load(Ordering::SeqCst);
            if left > 0 {
                self.reconnect_failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::Browser("target closed".to_string()));
            }
            Ok(())
        }

        async fn navigate_to_live(&self) -> Result<()> {
            Ok(())
        }

        async fn check_login_required(&self) -> Result<bool> {
            let left = self.login_walls.load(Ordering::SeqCst);
            if left > 0 {
                self.login_walls.store(left - 1, Ordering::SeqCst);
                return Ok(true);
            }
            Ok(false)
        }

        fn set_network_callback(&self, callback: NetworkCallback) {
            *self.callback.lock().unwrap() = Some(callback);
        }
    }

    struct Fixture {
        scanner: Scanner,
        browser: Arc<FakeBrowser>,
        strategy: Arc<ScriptedStrategy>,
        listener: Arc<RecordingListener>,
    }

    fn fixture() -> Fixture {
        let browser = Arc::new(FakeBrowser::default());
        let strategy = Arc::new(ScriptedStrategy::default());
        let listener = Arc::new(RecordingListener::default());
        let scanner = Scanner::new(
            browser.clone(),
            strategy.clone(),
            listener.clone(),
            ScannerSettings::default(),
        );
        Fixture { scanner, browser, strategy, listener }
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let f = fixture();
        f.scanner.start().await.unwrap();
        f.scanner.start().await.unwrap();

        assert!(f.scanner.is_running());
        assert_eq!(f.browser.starts.load(Ordering::SeqCst), 1);
        assert_eq!(f.listener.statuses.lock().unwrap()[0], ScannerStatus::Connected);

        f.scanner.stop().await.unwrap();
        f.scanner.stop().await.unwrap();
        assert!(!f.scanner.is_running());
        assert_eq!(f.browser.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_reports_error() {
        let f = fixture();
        f.browser.fail_start.store(true, Ordering::SeqCst);

        assert!(f.scanner.start().await.is_err());
        assert!(!f.scanner.is_running());
        assert_eq!(*f.listener.statuses.lock().unwrap(), vec![ScannerStatus::Error]);
        assert_eq!(f.scanner.health().status, Some(ScannerStatus::Error));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_login_before_connecting() {
        let f = fixture();
        f.browser.login_walls.store(2, Ordering::SeqCst);

        f.scanner.start().await.unwrap();
        let statuses = f.listener.statuses.lock().unwrap().clone();
        assert_eq!(statuses[..2], [ScannerStatus::WaitingLogin, ScannerStatus::Connected]);
        f.scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn login_timeout_proceeds_anyway() {
        let f = fixture();
        f.browser.login_walls.store(u32::MAX, Ordering::SeqCst);

        let started = Instant::now();
        f.scanner.start().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(300));
        assert!(f.scanner.is_running());
        f.scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stop_interrupts_the_login_wait() {
        let f = fixture();
        f.browser.login_walls.store(u32::MAX, Ordering::SeqCst);
        let scanner = Arc::new(f.scanner);

        let starting = tokio::spawn({
            let scanner = Arc::clone(&scanner);
            async move { scanner.start().await }
        });
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(scanner.health().status, Some(ScannerStatus::WaitingLogin));

        let stop_began = Instant::now();
        scanner.stop().await.unwrap();
        assert!(stop_began.elapsed() < Duration::from_secs(1));

        starting.await.unwrap().unwrap();
        assert!(!scanner.is_running());
        assert_eq!(f.browser.stops.load(Ordering::SeqCst), 1);

        // A later start is not affected by the earlier stop request.
        f.browser.login_walls.store(0, Ordering::SeqCst);
        scanner.start().await.unwrap();
        assert!(scanner.is_running());
        scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn captured_payloads_reach_the_registry() {
        let f = fixture();
        f.scanner.start().await.unwrap();
        f.strategy.set(Some("gap>=3"));

        f.browser.emit(json!({"events": [{"id": "m1", "status": "live"}, {"id": "m2"}]}));
        wait_until(|| f.scanner.events().len() == 2).await;

        assert_eq!(f.scanner.active_matches_count(), 2);
        assert_eq!(f.scanner.tracked_matches_count(), 2);
        assert_eq!(f.scanner.event("m1").unwrap().lifecycle_status, LifecycleStatus::Signal);
        assert!(f.scanner.last_signal().is_some());
        assert_eq!(f.scanner.recent_signals(10).len(), 2);
        assert!(f.scanner.seconds_since_last_payload().is_some());
        assert_eq!(f.scanner.health().payloads_received, 1);

        f.scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn worker_survives_a_panicking_listener() {
        struct Exploding;
        impl ScannerListener for Exploding {
            fn on_event_update(&self, event: &Event) {
                if event.match_id == "boom" {
                    panic!("listener failure");
                }
            }
        }

        let browser = Arc::new(FakeBrowser::default());
        let scanner = Scanner::new(
            browser.clone(),
            Arc::new(ScriptedStrategy::default()),
            Arc::new(Exploding),
            ScannerSettings::default(),
        );
        scanner.start().await.unwrap();

        browser.emit(json!({"id": "boom"}));
        browser.emit(json!({"id": "fine"}));
        wait_until(|| scanner.event("fine").is_some()).await;

        scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_retries_until_success() {
        let f = fixture();
        f.scanner.start().await.unwrap();
        f.browser.reconnect_failures.store(2, Ordering::SeqCst);
        f.listener.statuses.lock().unwrap().clear();

        f.scanner.reconnect().await;

        assert_eq!(f.browser.reconnects.load(Ordering::SeqCst), 3);
        let statuses = f.listener.statuses.lock().unwrap().clone();
        let errors = statuses.iter().filter(|s| **s == ScannerStatus::Error).count();
        assert_eq!(errors, 2);
        assert_eq!(statuses.last(), Some(&ScannerStatus::Connected));

        f.scanner.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_is_abandoned_when_stopped() {
        let f = fixture();
        f.scanner.reconnect().await;
        assert_eq!(f.browser.reconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reconnect_backoff_is_capped() {
        let delays: Vec<u64> = (0..7).map(|a| reconnect_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60, 60]);
    }
}
