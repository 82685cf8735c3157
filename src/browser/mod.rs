//! Browser collaborator: owns the session that captures the live feed.
//!
//! The scanner only talks to the [`BrowserManager`] trait. [`ChromeCapture`]
//! is the implementation used by the binary; it attaches to a Chrome that is
//! already running with `--remote-debugging-port`.

pub mod cdp;
pub mod chrome;

pub use chrome::ChromeCapture;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Invoked once per captured network payload. Must not block: the scanner's
/// implementation only forwards the payload onto its worker channel.
pub type NetworkCallback = Arc<dyn Fn(Value) + Send + Sync>;

#[async_trait]
pub trait BrowserManager: Send + Sync {
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn reconnect(&self) -> Result<()>;

    async fn navigate_to_live(&self) -> Result<()>;

    /// True while the live page is hidden behind a login wall.
    async fn check_login_required(&self) -> Result<bool>;

    /// Replaces any previously registered callback.
    fn set_network_callback(&self, callback: NetworkCallback);
}
