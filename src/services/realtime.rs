//! Hosted realtime push client for Marksync.
//!
//! Speaks the Phoenix channel protocol of the hosted realtime service over a
//! websocket: joins `realtime:bookmarks-{owner}` with a `postgres_changes`
//! filter on `user_id`, keeps the socket alive with heartbeats, and reshapes
//! every change message into the row-change payload the subscriber parses.
//! Each subscription owns one socket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::services::push_hub::{PushService, PushSubscription};
use crate::services::rest_store::RestConfig;
use crate::types::errors::PushError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const REALTIME_PATH: &str = "/realtime/v1/websocket";
const PROTOCOL_VERSION: &str = "1.0.0";
const JOIN_REF: &str = "1";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const CHANNEL_CAPACITY: usize = 256;

/// One Phoenix channel frame.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    join_ref: Option<String>,
}

impl Frame {
    fn new(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
            join_ref: None,
        }
    }

    fn into_message(self) -> Result<Message, PushError> {
        serde_json::to_string(&self)
            .map(Message::Text)
            .map_err(|e| PushError::SubscribeFailed(e.to_string()))
    }
}

/// Websocket endpoint of the realtime service for a project base URL.
pub fn realtime_endpoint(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let socket_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base.to_string()
    };
    format!(
        "{}{}?apikey={}&vsn={}",
        socket_base, REALTIME_PATH, api_key, PROTOCOL_VERSION
    )
}

/// Channel topic on the realtime service for a push topic.
fn channel_topic(topic: &str) -> String {
    format!("realtime:{}", topic)
}

/// Reshapes a `postgres_changes` frame payload into
/// `{"eventType", "new", "old"}`.
fn change_payload(payload: &Value) -> Option<Value> {
    let data = payload.get("data")?;
    let event_type = data.get("type")?.as_str()?;
    let row = |key: &str| {
        data.get(key)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| json!({}))
    };
    Some(json!({
        "eventType": event_type,
        "schema": data.get("schema").cloned().unwrap_or(Value::Null),
        "table": data.get("table").cloned().unwrap_or(Value::Null),
        "new": row("record"),
        "old": row("old_record"),
    }))
}

/// Push service backed by the hosted realtime websocket.
pub struct RealtimeClient {
    endpoint: String,
    access_token: String,
    heartbeat: Duration,
    channels: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

impl RealtimeClient {
    pub fn new(config: &RestConfig) -> Self {
        let endpoint = config
            .realtime_url
            .clone()
            .unwrap_or_else(|| realtime_endpoint(&config.base_url, &config.api_key));
        Self {
            endpoint,
            access_token: config.access_token.clone(),
            heartbeat: HEARTBEAT_INTERVAL,
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the heartbeat period.
    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Number of channels not yet unsubscribed.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<()>>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn join_frame(&self, owner: &str, topic: &str) -> Frame {
        let payload = json!({
            "config": {
                "broadcast": { "self": true },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": "bookmarks",
                    "filter": format!("user_id=eq.{}", owner),
                }],
            },
            "access_token": self.access_token,
        });
        let mut frame = Frame::new(topic, "phx_join", payload, JOIN_REF.to_string());
        frame.join_ref = Some(JOIN_REF.to_string());
        frame
    }
}

/// Reads frames until the reply to the join arrives.
async fn await_join(socket: &mut Socket, topic: &str) -> Result<(), PushError> {
    while let Some(message) = socket.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => return Err(PushError::SubscribeFailed(e.to_string())),
        };
        let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
            continue;
        };
        if frame.topic != topic
            || frame.event != "phx_reply"
            || frame.reference.as_deref() != Some(JOIN_REF)
        {
            continue;
        }
        return match frame.payload.get("status").and_then(Value::as_str) {
            Some("ok") => Ok(()),
            _ => Err(PushError::SubscribeFailed(format!(
                "join rejected: {}",
                frame.payload.get("response").cloned().unwrap_or(Value::Null)
            ))),
        };
    }
    Err(PushError::SubscribeFailed(
        "socket closed before join reply".to_string(),
    ))
}

/// Pumps one joined channel until it is left, closed, or its reader is gone.
async fn run_channel(
    mut socket: Socket,
    topic: String,
    tx: mpsc::Sender<Value>,
    mut leave: oneshot::Receiver<()>,
    heartbeat: Duration,
) {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut leave => {
                let frame = Frame::new(&topic, "phx_leave", json!({}), next_ref.to_string());
                if let Ok(message) = frame.into_message() {
                    let _ = socket.send(message).await;
                }
                let _ = socket.close(None).await;
                debug!(topic = %topic, "left realtime channel");
                break;
            }
            _ = tx.closed() => {
                let _ = socket.close(None).await;
                break;
            }
            _ = ticker.tick() => {
                let frame = Frame::new("phoenix", "heartbeat", json!({}), next_ref.to_string());
                next_ref += 1;
                let sent = match frame.into_message() {
                    Ok(message) => socket.send(message).await.is_ok(),
                    Err(_) => false,
                };
                if !sent {
                    warn!(topic = %topic, "realtime heartbeat failed");
                    break;
                }
            }
            incoming = socket.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(topic = %topic, "realtime socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(topic = %topic, error = %e, "realtime socket error");
                        break;
                    }
                };
                let frame = match serde_json::from_str::<Frame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "discarding unreadable realtime frame");
                        continue;
                    }
                };
                if frame.topic != topic {
                    continue;
                }
                match frame.event.as_str() {
                    "postgres_changes" => match change_payload(&frame.payload) {
                        Some(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        None => warn!(topic = %topic, "postgres_changes frame without data"),
                    },
                    "phx_close" | "phx_error" => {
                        warn!(topic = %topic, event = %frame.event, "realtime channel ended by server");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

#[async_trait]
impl PushService for RealtimeClient {
    async fn subscribe(&self, owner: &str, topic: &str) -> Result<PushSubscription, PushError> {
        let channel = channel_topic(topic);
        let (mut socket, _) = connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| PushError::SubscribeFailed(e.to_string()))?;

        let join = self.join_frame(owner, &channel).into_message()?;
        socket
            .send(join)
            .await
            .map_err(|e| PushError::SubscribeFailed(e.to_string()))?;
        timeout(JOIN_TIMEOUT, await_join(&mut socket, &channel))
            .await
            .map_err(|_| PushError::SubscribeFailed("join timed out".to_string()))??;

        let (tx, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let (leave_tx, leave_rx) = oneshot::channel();
        let channel_id = Uuid::new_v4().to_string();
        self.lock().insert(channel_id.clone(), leave_tx);
        tokio::spawn(run_channel(socket, channel.clone(), tx, leave_rx, self.heartbeat));

        info!(channel_id = %channel_id, topic = %channel, "joined realtime channel");
        Ok(PushSubscription {
            channel_id,
            receiver,
        })
    }

    async fn unsubscribe(&self, channel_id: &str) -> Result<(), PushError> {
        let leave = self
            .lock()
            .remove(channel_id)
            .ok_or_else(|| PushError::ChannelNotFound(channel_id.to_string()))?;
        // The pump may already have stopped if the server closed the socket.
        let _ = leave.send(());
        Ok(())
    }
}
