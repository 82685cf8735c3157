//! The scanner worker: the only task that mutates the registries.
//!
//! Captured payloads and the 1 s housekeeping tick are multiplexed onto one
//! loop. A panic while handling either is contained to that iteration.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::api::latency::LatencyStats;
use crate::config::{MONITOR_ERROR_BACKOFF_SECS, MONITOR_TICK_SECS};
use crate::scanner::pipeline::Pipeline;
use crate::types::unix_now;

/// A payload handed over by the capture callback.
pub struct Captured {
    pub payload: Value,
    pub received_at: Instant,
}

impl Captured {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            received_at: Instant::now(),
        }
    }
}

enum Step {
    Payload(Captured),
    Tick,
}

pub async fn run(
    mut pipeline: Pipeline,
    mut payloads: mpsc::Receiver<Captured>,
    mut shutdown: watch::Receiver<bool>,
    latency: Arc<LatencyStats>,
) {
    let mut ticker = interval(Duration::from_secs(MONITOR_TICK_SECS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // consume immediate first tick

    info!("[MONITOR] worker started");
    loop {
        let step = tokio::select! {
            _ = shutdown.changed() => break,
            Some(captured) = payloads.recv() => Step::Payload(captured),
            _ = ticker.tick() => Step::Tick,
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| match step {
            Step::Payload(captured) => {
                pipeline.handle_network_data(&captured.payload, unix_now());
                latency.record(captured.received_at.elapsed());
            }
            Step::Tick => pipeline.tick(unix_now()),
        }));

        if outcome.is_err() {
            error!(
                "[MONITOR] iteration panicked, backing off {}s",
                MONITOR_ERROR_BACKOFF_SECS
            );
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(Duration::from_secs(MONITOR_ERROR_BACKOFF_SECS)) => {}
            }
        }
    }
    info!("[MONITOR] worker stopped");
}
