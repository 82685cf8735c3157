mod api;
mod browser;
mod config;
mod error;
mod normalizer;
mod scanner;
mod state;
mod strategy;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::browser::ChromeCapture;
use crate::config::{Config, FEED_WATCHDOG_INTERVAL_SECS};
use crate::error::Result;
use crate::scanner::{LogListener, Scanner};
use crate::strategy::PointGapStrategy;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!(
        cdp_url = %cfg.cdp_url,
        live_url = %cfg.live_url,
        cooldown_secs = cfg.scanner.signal_cooldown_secs,
        stale_after_secs = cfg.scanner.stale_after_secs,
        candidate_min_gap = cfg.scanner.candidate_min_gap,
        candidate_max_gap = cfg.scanner.candidate_max_gap,
        strategy_gap = cfg.strategy_point_gap,
        retention_secs = ?cfg.scanner.retention_secs,
        "Starting live scanner"
    );

    let browser = Arc::new(ChromeCapture::new(
        cfg.cdp_url.clone(),
        cfg.live_url.clone(),
        cfg.login_selector.clone(),
    ));
    let scanner = Arc::new(Scanner::new(
        browser,
        Arc::new(PointGapStrategy::new(cfg.strategy_point_gap)),
        Arc::new(LogListener::new()),
        cfg.scanner.clone(),
    ));

    scanner.start().await?;

    // Feed watchdog: the live page can silently stop pushing updates
    let watchdog_scanner = Arc::clone(&scanner);
    let silence_secs = cfg.feed_silence_secs;
    tokio::spawn(async move {
        feed_watchdog(watchdog_scanner, silence_secs).await;
    });

    // HTTP API server
    let api_state = ApiState { scanner: Arc::clone(&scanner) };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scanner.stop().await?;
    info!("Shutdown complete");
    Ok(())
}

/// Reconnect when the scanner is running but nothing was captured for
/// `silence_secs`. Silence is measured from the later of the last payload and
/// the last (re)connect.
async fn feed_watchdog(scanner: Arc<Scanner>, silence_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(FEED_WATCHDOG_INTERVAL_SECS));
    ticker.tick().await; // consume immediate first tick
    let mut connected_at = tokio::time::Instant::now();

    loop {
        ticker.tick().await;
        if !scanner.is_running() {
            continue;
        }
        let since_connect = connected_at.elapsed().as_secs_f64();
        let silent_for = scanner
            .seconds_since_last_payload()
            .map_or(since_connect, |s| s.min(since_connect));
        if silent_for >= silence_secs as f64 {
            warn!(silent_secs = silent_for, "[WATCHDOG] feed silent, reconnecting");
            scanner.reconnect().await;
            connected_at = tokio::time::Instant::now();
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
