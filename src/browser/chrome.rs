//! Capture adapter for an already running Chrome.
//!
//! Target discovery goes through the DevTools HTTP endpoint, everything else
//! through [`CdpClient`]. Captured JSON (XHR/fetch bodies and WebSocket
//! frames) is handed to the registered [`NetworkCallback`].

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::browser::cdp::{CdpClient, CdpEvent};
use crate::browser::{BrowserManager, NetworkCallback};
use crate::error::{AppError, Result};

type SharedCallback = Arc<RwLock<Option<NetworkCallback>>>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetInfo {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url: String,
    web_socket_debugger_url: Option<String>,
}

struct Session {
    client: CdpClient,
    capture: JoinHandle<()>,
}

pub struct ChromeCapture {
    http: reqwest::Client,
    cdp_url: String,
    live_url: String,
    login_selector: String,
    callback: SharedCallback,
    session: Mutex<Option<Session>>,
}

impl ChromeCapture {
    pub fn new(
        cdp_url: impl Into<String>,
        live_url: impl Into<String>,
        login_selector: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            cdp_url: cdp_url.into().trim_end_matches('/').to_string(),
            live_url: live_url.into(),
            login_selector: login_selector.into(),
            callback: Arc::new(RwLock::new(None)),
            session: Mutex::new(None),
        }
    }

    async fn discover_page(&self) -> Result<String> {
        let url = format!("{}/json", self.cdp_url);
        let targets: Vec<TargetInfo> = self.http.get(&url).send().await?.json().await?;
        let target = pick_page_target(&targets).ok_or_else(|| {
            AppError::Browser(format!("no debuggable page target at {url}"))
        })?;
        info!(url = %target.url, "[CDP] attaching to page target");
        target
            .web_socket_debugger_url
            .clone()
            .ok_or_else(|| AppError::Browser("page target has no webSocketDebuggerUrl".to_string()))
    }

    async fn client(&self) -> Result<CdpClient> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.client.clone())
            .ok_or_else(|| AppError::Browser("browser session not started".to_string()))
    }
}

#[async_trait]
impl BrowserManager for ChromeCapture {
    async fn start(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let ws_url = self.discover_page().await?;
        let (client, events) = CdpClient::connect(&ws_url).await?;
        if let Err(e) = enable_capture(&client).await {
            client.close().await;
            return Err(e);
        }

        let capture = tokio::spawn(capture_loop(
            client.clone(),
            events,
            Arc::clone(&self.callback),
        ));
        *session = Some(Session { client, capture });
        info!("[CDP] network capture enabled");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(session) = self.session.lock().await.take() {
            session.capture.abort();
            session.client.close().await;
            info!("[CDP] session closed");
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }

    async fn navigate_to_live(&self) -> Result<()> {
        let client = self.client().await?;
        let result = client
            .send_command("Page.navigate", json!({ "url": self.live_url }))
            .await?;
        if let Some(err) = result.get("errorText").and_then(Value::as_str) {
            return Err(AppError::Browser(format!("navigation failed: {err}")));
        }
        info!(url = %self.live_url, "[CDP] navigated to live page");
        Ok(())
    }

    async fn check_login_required(&self) -> Result<bool> {
        let client = self.client().await?;
        let result = client
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": login_probe_expression(&self.login_selector),
                    "returnByValue": true,
                }),
            )
            .await?;
        Ok(result
            .pointer("/result/value")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn set_network_callback(&self, callback: NetworkCallback) {
        if let Ok(mut slot) = self.callback.write() {
            *slot = Some(callback);
        }
    }
}

async fn enable_capture(client: &CdpClient) -> Result<()> {
    client.enable_domain("Network").await?;
    client.enable_domain("Page").await?;
    Ok(())
}

async fn capture_loop(
    client: CdpClient,
    mut events: mpsc::UnboundedReceiver<CdpEvent>,
    callback: SharedCallback,
) {
    // requestIds of JSON responses whose body is not loaded yet
    let mut pending_bodies: HashSet<String> = HashSet::new();

    while let Some(CdpEvent { method, params }) = events.recv().await {
        match method.as_str() {
            "Network.responseReceived" => {
                if is_json_response(&params) {
                    if let Some(id) = request_id(&params) {
                        pending_bodies.insert(id);
                    }
                }
            }
            "Network.loadingFinished" => {
                let Some(id) = request_id(&params) else { continue };
                if !pending_bodies.remove(&id) {
                    continue;
                }
                match client
                    .send_command("Network.getResponseBody", json!({ "requestId": id }))
                    .await
                {
                    Ok(body) => {
                        if let Some(payload) = decode_body(&body) {
                            emit(&callback, payload);
                        }
                    }
                    Err(e) => debug!(request_id = %id, "[CDP] body unavailable: {e}"),
                }
            }
            "Network.loadingFailed" => {
                if let Some(id) = request_id(&params) {
                    pending_bodies.remove(&id);
                }
            }
            "Network.webSocketFrameReceived" => {
                let frame = params
                    .pointer("/response/payloadData")
                    .and_then(Value::as_str);
                if let Some(payload) = frame.and_then(parse_frame_payload) {
                    emit(&callback, payload);
                }
            }
            _ => {}
        }
    }
    warn!("[CDP] event stream ended");
}

fn emit(callback: &SharedCallback, payload: Value) {
    let cb = callback.read().ok().and_then(|slot| slot.clone());
    match cb {
        Some(cb) => cb(payload),
        None => debug!("[CDP] payload captured before a callback was registered"),
    }
}

fn pick_page_target(targets: &[TargetInfo]) -> Option<&TargetInfo> {
    targets
        .iter()
        .find(|t| t.kind == "page" && t.web_socket_debugger_url.is_some())
}

fn request_id(params: &Value) -> Option<String> {
    params
        .get("requestId")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn is_json_response(params: &Value) -> bool {
    params
        .pointer("/response/mimeType")
        .and_then(Value::as_str)
        .is_some_and(|mime| mime.to_ascii_lowercase().contains("json"))
}

/// Body of a `Network.getResponseBody` result, if it is inline JSON.
fn decode_body(result: &Value) -> Option<Value> {
    if result
        .get("base64Encoded")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return None;
    }
    let body = result.get("body")?.as_str()?;
    serde_json::from_str(body).ok()
}

/// Parse a WebSocket frame as JSON. Socket.IO frames carry a numeric packet
/// prefix (`42["update",{...}]`), so parsing restarts at the first `{` or `[`.
fn parse_frame_payload(frame: &str) -> Option<Value> {
    let frame = frame.trim();
    if let Ok(v) = serde_json::from_str::<Value>(frame) {
        return matches!(v, Value::Object(_) | Value::Array(_)).then_some(v);
    }
    let start = frame.find(|c| c == '{' || c == '[')?;
    serde_json::from_str(&frame[start..]).ok()
}

fn login_probe_expression(selector: &str) -> String {
    // Serialising the selector gives a correctly escaped JS string literal.
    let literal = Value::String(selector.to_string()).to_string();
    format!("!!document.querySelector({literal})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_page_with_debugger_url() {
        let targets: Vec<TargetInfo> = serde_json::from_value(json!([
            {"type": "service_worker", "url": "sw.js", "webSocketDebuggerUrl": "ws://a"},
            {"type": "page", "url": "about:blank"},
            {"type": "page", "url": "https://live", "webSocketDebuggerUrl": "ws://b"}
        ]))
        .unwrap();
        let target = pick_page_target(&targets).unwrap();
        assert_eq!(target.web_socket_debugger_url.as_deref(), Some("ws://b"));
        assert!(pick_page_target(&targets[..2]).is_none());
    }

    #[test]
    fn json_mime_detection() {
        assert!(is_json_response(&json!({"response": {"mimeType": "application/json"}})));
        assert!(is_json_response(&json!({"response": {"mimeType": "Application/JSON; charset=utf-8"}})));
        assert!(!is_json_response(&json!({"response": {"mimeType": "text/html"}})));
        assert!(!is_json_response(&json!({})));
    }

    #[test]
    fn response_body_decoding() {
        assert_eq!(
            decode_body(&json!({"body": "{\"id\":\"m1\"}", "base64Encoded": false})),
            Some(json!({"id": "m1"}))
        );
        assert_eq!(decode_body(&json!({"body": "e30=", "base64Encoded": true})), None);
        assert_eq!(decode_body(&json!({"body": "<html>"})), None);
    }

    #[test]
    fn frames_with_socketio_prefix() {
        assert_eq!(
            parse_frame_payload(r#"42["update",{"id":"m1"}]"#),
            Some(json!(["update", {"id": "m1"}]))
        );
        assert_eq!(parse_frame_payload(r#" {"id":"m2"} "#), Some(json!({"id": "m2"})));
        assert_eq!(parse_frame_payload("3"), None);
        assert_eq!(parse_frame_payload("2probe"), None);
    }

    #[test]
    fn login_probe_escapes_selector() {
        assert_eq!(
            login_probe_expression(r#"input[type="password"]"#),
            r#"!!document.querySelector("input[type=\"password\"]")"#
        );
    }

    #[test]
    fn emit_reaches_registered_callback() {
        let capture = ChromeCapture::new("http://127.0.0.1:9222/", "https://live", "form");
        assert_eq!(capture.cdp_url, "http://127.0.0.1:9222");

        let seen = Arc::new(std::sync::Mutex::new(Vec::<Value>::new()));
        let sink = Arc::clone(&seen);
        capture.set_network_callback(Arc::new(move |v: Value| sink.lock().unwrap().push(v)));

        emit(&capture.callback, json!({"id": "m1"}));
        assert_eq!(seen.lock().unwrap().as_slice(), &[json!({"id": "m1"})]);
    }

    #[tokio::test]
    async fn commands_require_a_session() {
        let capture = ChromeCapture::new("http://127.0.0.1:9222", "https://live", "form");
        assert!(matches!(capture.navigate_to_live().await, Err(AppError::Browser(_))));
        assert!(capture.stop().await.is_ok());
    }
}
