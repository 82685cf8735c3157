use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthSnapshot;
use crate::error::AppError;
use crate::scanner::Scanner;
use crate::types::{Event, LifecycleStatus, Signal};

#[derive(Clone)]
pub struct ApiState {
    pub scanner: Arc<Scanner>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/events", get(get_events))
        .route("/events/:id", get(get_event))
        .route("/signals/recent", get(get_recent_signals))
        .route("/signals/last", get(get_last_signal))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize, Default)]
pub struct EventsQuery {
    /// WATCH, CANDIDATE, SIGNAL, STALE or FINISHED (any case)
    pub lifecycle: Option<String>,
    /// Only matches that are neither STALE nor FINISHED.
    pub active: Option<bool>,
}

#[derive(Deserialize, Default)]
pub struct RecentSignalsQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub health: HealthSnapshot,
    pub active_matches: usize,
    pub tracked_matches: usize,
    pub seconds_since_last_payload: Option<f64>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let scanner = &state.scanner;
    Json(HealthResponse {
        health: scanner.health(),
        active_matches: scanner.active_matches_count(),
        tracked_matches: scanner.tracked_matches_count(),
        seconds_since_last_payload: scanner.seconds_since_last_payload(),
    })
}

async fn get_events(
    State(state): State<ApiState>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let lifecycle = params
        .lifecycle
        .as_deref()
        .map(str::parse::<LifecycleStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;
    let active_only = params.active.unwrap_or(false);

    let mut events: Vec<Event> = state
        .scanner
        .events()
        .into_values()
        .filter(|e| lifecycle.map_or(true, |l| e.lifecycle_status == l))
        .filter(|e| !active_only || e.lifecycle_status.is_active())
        .collect();

    // Most recently updated first.
    events.sort_by(|a, b| {
        b.last_update_ts
            .unwrap_or(0.0)
            .total_cmp(&a.last_update_ts.unwrap_or(0.0))
            .then_with(|| a.match_id.cmp(&b.match_id))
    });

    Ok(Json(events))
}

async fn get_event(
    State(state): State<ApiState>,
    Path(match_id): Path<String>,
) -> Result<Json<Event>, AppError> {
    state
        .scanner
        .event(&match_id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("match {match_id}")))
}

async fn get_recent_signals(
    State(state): State<ApiState>,
    Query(params): Query<RecentSignalsQuery>,
) -> Json<Vec<Signal>> {
    let limit = params.limit.unwrap_or(50);
    Json(state.scanner.recent_signals(limit))
}

async fn get_last_signal(State(state): State<ApiState>) -> Json<Option<Signal>> {
    Json(state.scanner.last_signal())
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let latency = state.scanner.latency();
    let (p50_us, p95_us, p99_us) = latency.percentiles();
    Json(LatencyResponse {
        samples: latency.len(),
        p50_us,
        p95_us,
        p99_us,
    })
}
