//! Minimal Chrome DevTools Protocol client.
//!
//! Commands carry auto-incrementing ids and are correlated with their
//! responses; everything without an id is an event and goes to the channel
//! returned by [`CdpClient::connect`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::CDP_COMMAND_TIMEOUT_SECS;
use crate::error::{AppError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<CdpMessage>>>>;

#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// One decoded frame from the DevTools socket.
#[derive(Debug, Clone, PartialEq)]
pub enum CdpMessage {
    Response {
        id: u64,
        result: Value,
    },
    Error {
        id: u64,
        code: i64,
        message: String,
    },
    Event {
        method: String,
        params: Value,
    },
}

/// Classify a DevTools frame. Unrecognised frames yield `None`.
pub fn parse_cdp_message(json: &Value) -> Option<CdpMessage> {
    if let Some(id) = json.get("id").and_then(Value::as_u64) {
        if let Some(err) = json.get("error") {
            return Some(CdpMessage::Error {
                id,
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        return Some(CdpMessage::Response {
            id,
            result: json.get("result").cloned().unwrap_or(Value::Null),
        });
    }
    let method = json.get("method")?.as_str()?.to_string();
    let params = json.get("params").cloned().unwrap_or(Value::Null);
    Some(CdpMessage::Event { method, params })
}

#[derive(Clone)]
pub struct CdpClient {
    next_id: Arc<AtomicU64>,
    pending: Pending,
    writer: Arc<Mutex<WsSink>>,
    reader: Arc<tokio::task::JoinHandle<()>>,
}

impl CdpClient {
    /// Connect to a target's `webSocketDebuggerUrl`.
    pub async fn connect(ws_url: &str) -> Result<(Self, mpsc::UnboundedReceiver<CdpEvent>)> {
        info!("[CDP] connecting to {ws_url}");
        let (ws_stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
        let (writer, reader) = ws_stream.split();

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            read_loop(reader, reader_pending, event_tx).await;
        });

        Ok((
            Self {
                next_id: Arc::new(AtomicU64::new(1)),
                pending,
                writer: Arc::new(Mutex::new(writer)),
                reader: Arc::new(reader),
            },
            event_rx,
        ))
    }

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let frame = serde_json::json!({ "id": id, "method": method, "params": params });

        // Register before sending so a fast response cannot be missed.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        debug!(id, method, "[CDP] command");
        let sent = self
            .writer
            .lock()
            .await
            .send(Message::Text(frame.to_string().into()))
            .await;
        if let Err(e) = sent {
            self.pending.lock().await.remove(&id);
            return Err(e.into());
        }

        let reply = tokio::time::timeout(Duration::from_secs(CDP_COMMAND_TIMEOUT_SECS), rx).await;
        let reply = match reply {
            Ok(Ok(msg)) => msg,
            Ok(Err(_)) => return Err(AppError::Browser("DevTools connection closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(AppError::CdpTimeout { method: method.to_string() });
            }
        };

        match reply {
            CdpMessage::Response { result, .. } => Ok(result),
            CdpMessage::Error { code, message, .. } => Err(AppError::Cdp { code, message }),
            CdpMessage::Event { .. } => Err(AppError::Browser(format!(
                "unexpected event in reply to {method}"
            ))),
        }
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{domain}.enable"), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Stop the reader; pending commands fail with a closed-connection error.
    pub async fn close(&self) {
        self.reader.abort();
        self.pending.lock().await.clear();
        let _ = self.writer.lock().await.close().await;
    }
}

async fn read_loop(
    mut reader: SplitStream<WsStream>,
    pending: Pending,
    event_tx: mpsc::UnboundedSender<CdpEvent>,
) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Binary(b)) => match String::from_utf8(b.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => {
                info!("[CDP] socket closed by browser");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("[CDP] read error, stopping reader: {e}");
                break;
            }
        };

        let Ok(json) = serde_json::from_str::<Value>(&text) else {
            debug!("[CDP] non-JSON frame ignored");
            continue;
        };

        match parse_cdp_message(&json) {
            Some(CdpMessage::Event { method, params }) => {
                // Nobody listening is fine.
                let _ = event_tx.send(CdpEvent { method, params });
            }
            Some(reply) => {
                let id = match &reply {
                    CdpMessage::Response { id, .. } | CdpMessage::Error { id, .. } => *id,
                    CdpMessage::Event { .. } => continue,
                };
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(reply);
                } else {
                    debug!(id, "[CDP] reply for unknown command id");
                }
            }
            None => {}
        }
    }

    // Dropping the senders fails every waiter with a closed-channel error.
    pending.lock().await.clear();
}
