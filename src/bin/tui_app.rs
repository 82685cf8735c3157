use std::collections::BTreeMap;

use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthResponse {
    pub running: bool,
    pub status: Option<String>,
    pub payloads_received: u64,
    pub payloads_dropped: u64,
    pub events_processed: u64,
    pub signals_fired: u64,
    pub signals_suppressed: u64,
    pub events_per_minute: u64,
    pub active_matches: usize,
    pub tracked_matches: usize,
    pub seconds_since_last_payload: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlayersResponse {
    pub p1: String,
    pub p2: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct OddsPairResponse {
    pub p1: Option<f64>,
    pub p2: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct EventResponse {
    pub match_id: String,
    #[serde(default)]
    pub players: PlayersResponse,
    pub league: Option<String>,
    pub tour: Option<String>,
    pub status: String,
    pub score_sets: Option<String>,
    pub score_points_current_set: Option<String>,
    pub current_set_index: Option<i64>,
    #[serde(default)]
    pub odds: BTreeMap<String, OddsPairResponse>,
    pub last_update_ts: Option<f64>,
    pub lifecycle_status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalResponse {
    pub match_id: String,
    pub reason: String,
    pub fired_at: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_us: Option<u64>,
    pub p95_us: Option<u64>,
    pub p99_us: Option<u64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub health: HealthResponse,
    pub events: Vec<EventResponse>,
    pub signals: Vec<SignalResponse>,
    pub latency: LatencyResponse,
    /// Hide STALE and FINISHED matches.
    pub active_only: bool,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            health: HealthResponse::default(),
            events: Vec::new(),
            signals: Vec::new(),
            latency: LatencyResponse::default(),
            active_only: true,
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    pub fn toggle_active_only(&mut self) {
        self.active_only = !self.active_only;
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let health_url = format!("{}/health", self.base_url);
        let events_url = format!("{}/events?active={}", self.base_url, self.active_only);
        let signals_url = format!("{}/signals/recent?limit=50", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (health_res, events_res, signals_res, latency_res) = tokio::join!(
            client.get(&health_url).send(),
            client.get(&events_url).send(),
            client.get(&signals_url).send(),
            client.get(&latency_url).send(),
        );

        let (health_res, events_res) = match (health_res, events_res) {
            (Ok(h), Ok(e)) => (h, e),
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("{e}"));
                return;
            }
        };

        let (health, events) = tokio::join!(
            health_res.json::<HealthResponse>(),
            events_res.json::<Vec<EventResponse>>(),
        );

        match (health, events) {
            (Ok(h), Ok(e)) => {
                self.health = h;
                self.events = e;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();

                if let Ok(s) = signals_res {
                    if let Ok(signals) = s.json::<Vec<SignalResponse>>().await {
                        self.signals = signals;
                    }
                }
                if let Ok(l) = latency_res {
                    if let Ok(latency) = l.json::<LatencyResponse>().await {
                        self.latency = latency;
                    }
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                self.status = ConnectionStatus::Error(format!("parse error: {e}"));
            }
        }
    }

    /// "p1 vs p2" for a match id, falling back to the id itself.
    pub fn match_label(&self, match_id: &str) -> String {
        self.events
            .iter()
            .find(|e| e.match_id == match_id)
            .map(|e| format!("{} vs {}", e.players.p1, e.players.p2))
            .unwrap_or_else(|| match_id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_odds(odds: &BTreeMap<String, OddsPairResponse>) -> String {
    match odds.get("match_winner") {
        Some(OddsPairResponse { p1: Some(a), p2: Some(b) }) => format!("{a:.2}/{b:.2}"),
        _ => "—".to_string(),
    }
}

pub fn format_age(secs: Option<f64>) -> String {
    match secs {
        Some(s) if s >= 60.0 => format!("{:.0}m", s / 60.0),
        Some(s) => format!("{s:.0}s"),
        None => "—".to_string(),
    }
}

pub fn format_latency_us(us: Option<u64>) -> String {
    match us {
        Some(v) if v >= 1000 => format!("{:.1}ms", v as f64 / 1000.0),
        Some(v) => format!("{v}us"),
        None => "—".to_string(),
    }
}

/// Convert a unix-seconds timestamp to a UTC HH:MM:SS string.
pub fn format_time_secs(ts: f64) -> String {
    let secs = ts.max(0.0) as u64;
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}

fn main() {
    // Helpers only; the dashboard entry point lives in src/bin/tui.rs
}
