use crate::error::{AppError, Result};

pub const CDP_URL: &str = "http://127.0.0.1:9222";

/// Matches a password field, which is present on every login wall we have seen.
pub const LOGIN_SELECTOR: &str = "input[type=\"password\"]";

/// Seconds without a network update before a match is marked STALE.
pub const STALE_AFTER_SECS: f64 = 60.0;

/// A reason-identical signal for the same match is suppressed for this long.
pub const SIGNAL_COOLDOWN_SECS: f64 = 180.0;

/// Sliding window used for the events-per-minute metric.
pub const RATE_WINDOW_SECS: f64 = 60.0;

/// Monitoring loop tick (seconds).
pub const MONITOR_TICK_SECS: u64 = 1;

/// Pause after a failed monitoring iteration (seconds).
pub const MONITOR_ERROR_BACKOFF_SECS: u64 = 5;

/// Login wall polling.
pub const LOGIN_POLL_INTERVAL_SECS: u64 = 5;
pub const LOGIN_WAIT_TIMEOUT_SECS: u64 = 300;

/// Reconnect backoff values in seconds. The last value repeats forever.
pub const RECONNECT_BACKOFF_SECS: &[u64] = &[5, 10, 20, 40, 60];

/// Point-gap band for the CANDIDATE heuristic. Kept separate from the
/// strategy threshold on purpose: the two are tuned independently.
pub const CANDIDATE_MIN_GAP: i64 = 1;
pub const CANDIDATE_MAX_GAP: i64 = 5;

/// Default threshold for the reference point-gap strategy.
pub const STRATEGY_POINT_GAP: i64 = 6;

/// Feed watchdog: reconnect when nothing was captured for this long.
pub const FEED_SILENCE_SECS: u64 = 120;
pub const FEED_WATCHDOG_INTERVAL_SECS: u64 = 10;

/// Channel capacity between the capture callback and the scanner worker.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Number of fired signals kept for the status API.
pub const RECENT_SIGNALS_CAPACITY: usize = 100;

/// Timeout for a single CDP command.
pub const CDP_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// DevTools HTTP endpoint of an already running Chrome (CDP_URL)
    pub cdp_url: String,
    /// Page with the live feed (LIVE_URL, required)
    pub live_url: String,
    pub login_selector: String,
    pub api_port: u16,
    pub scanner: ScannerSettings,
    /// Threshold for the reference strategy (STRATEGY_POINT_GAP)
    pub strategy_point_gap: i64,
    pub feed_silence_secs: u64,
}

/// Tunables consumed by the scanner core. Defaults mirror the constants above.
#[derive(Debug, Clone)]
pub struct ScannerSettings {
    pub signal_cooldown_secs: f64,
    pub stale_after_secs: f64,
    pub candidate_min_gap: i64,
    pub candidate_max_gap: i64,
    /// Evict STALE/FINISHED matches unseen for this long. `None` keeps them forever.
    pub retention_secs: Option<f64>,
    pub login_poll_interval_secs: u64,
    pub login_wait_timeout_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            signal_cooldown_secs: SIGNAL_COOLDOWN_SECS,
            stale_after_secs: STALE_AFTER_SECS,
            candidate_min_gap: CANDIDATE_MIN_GAP,
            candidate_max_gap: CANDIDATE_MAX_GAP,
            retention_secs: None,
            login_poll_interval_secs: LOGIN_POLL_INTERVAL_SECS,
            login_wait_timeout_secs: LOGIN_WAIT_TIMEOUT_SECS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let live_url = std::env::var("LIVE_URL")
            .map_err(|_| AppError::Config("LIVE_URL must point at the live events page".to_string()))?;

        let candidate_min_gap = parse_env("CANDIDATE_MIN_GAP", CANDIDATE_MIN_GAP)?;
        let candidate_max_gap = parse_env("CANDIDATE_MAX_GAP", CANDIDATE_MAX_GAP)?;
        if candidate_min_gap > candidate_max_gap {
            return Err(AppError::Config(
                "CANDIDATE_MIN_GAP must not exceed CANDIDATE_MAX_GAP".to_string(),
            ));
        }

        let retention_secs = match std::env::var("SCANNER_RETENTION_SECS") {
            Ok(v) => Some(v.parse::<f64>().map_err(|_| {
                AppError::Config("SCANNER_RETENTION_SECS must be a number of seconds".to_string())
            })?),
            Err(_) => None,
        };

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            cdp_url: std::env::var("CDP_URL").unwrap_or_else(|_| CDP_URL.to_string()),
            live_url,
            login_selector: std::env::var("LOGIN_SELECTOR")
                .unwrap_or_else(|_| LOGIN_SELECTOR.to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            scanner: ScannerSettings {
                signal_cooldown_secs: parse_env("SIGNAL_COOLDOWN_SECS", SIGNAL_COOLDOWN_SECS)?,
                stale_after_secs: parse_env("STALE_AFTER_SECS", STALE_AFTER_SECS)?,
                candidate_min_gap,
                candidate_max_gap,
                retention_secs,
                ..ScannerSettings::default()
            },
            strategy_point_gap: parse_env("STRATEGY_POINT_GAP", STRATEGY_POINT_GAP)?,
            feed_silence_secs: parse_env("FEED_SILENCE_SECS", FEED_SILENCE_SECS)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        Err(_) => Ok(default),
    }
}
