//! Push channel — WebSocket delivery of reminders to connected app clients.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::NotificationError;
use crate::notify::channel::REMINDER_CHANNEL_ID;
use crate::notify::payload::ReminderPayload;
use crate::notify::sink::NotificationSink;

// ── JSON Protocol ───────────────────────────────────────────────────────

/// Message from client → server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Ping,
}

/// Message from server → client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage {
    Reminder {
        title: String,
        body: String,
        target_id: String,
    },
    Pong,
}

// ── Shared State ────────────────────────────────────────────────────────

struct PushChannelInner {
    /// Broadcast sender for reminders (deliver → WS handlers).
    outgoing_tx: broadcast::Sender<ServerMessage>,
}

/// Axum handler state (cloneable).
#[derive(Clone)]
struct WsState {
    inner: Arc<PushChannelInner>,
}

// ── PushChannel ─────────────────────────────────────────────────────────

/// A WebSocket-based notification sink.
///
/// `deliver()` broadcasts to every connected client; each WS handler
/// subscribes to the broadcast independently, so reconnects and multiple
/// devices are fine. Clients that connect later do not see earlier reminders.
#[derive(Clone)]
pub struct PushChannel {
    inner: Arc<PushChannelInner>,
}

impl PushChannel {
    pub fn new() -> Self {
        let (outgoing_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(PushChannelInner { outgoing_tx }),
        }
    }

    /// Build an Axum router with the `/ws/reminders` endpoint.
    pub fn router(&self) -> Router {
        let state = WsState {
            inner: Arc::clone(&self.inner),
        };

        Router::new()
            .route("/ws/reminders", get(ws_reminders_handler))
            .with_state(state)
    }

    /// Number of connected clients.
    pub fn subscriber_count(&self) -> usize {
        self.inner.outgoing_tx.receiver_count()
    }
}

impl Default for PushChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for PushChannel {
    fn name(&self) -> &str {
        "push"
    }

    fn deliver(&self, payload: &ReminderPayload) -> Result<(), NotificationError> {
        let msg = ServerMessage::Reminder {
            title: payload.title.clone(),
            body: payload.body.clone(),
            target_id: payload.target_id.clone(),
        };
        self.inner
            .outgoing_tx
            .send(msg)
            .map(|_| ())
            .map_err(|_| NotificationError::NoSubscribers {
                channel: REMINDER_CHANNEL_ID.to_string(),
            })
    }
}

// ── WebSocket Handler ───────────────────────────────────────────────────

async fn ws_reminders_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_reminder_socket(socket, state.inner))
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize push message");
            true
        }
    }
}

async fn handle_reminder_socket(mut socket: WebSocket, inner: Arc<PushChannelInner>) {
    info!("Reminder client connected");

    let mut outgoing_rx = inner.outgoing_tx.subscribe();

    loop {
        tokio::select! {
            result = outgoing_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if !send_json(&mut socket, &msg).await {
                            debug!("Reminder client disconnected during send");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "Reminder client lagged behind broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Ping) => {
                                if !send_json(&mut socket, &ServerMessage::Pong).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, text = %text, "Invalid JSON from reminder client");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "Reminder WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("Reminder client disconnected");
}
