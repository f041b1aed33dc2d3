//! # Live Data Router
//!
//! Subscriber-facing WebSocket endpoints. A client picks its channel by the
//! path it connects to (`/ws/raw`, `/ws/structured`) and then only receives;
//! anything it sends besides a close frame is ignored.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::{Channel, ConnectionRegistry, EvictReason, PipelineStats, SubscriberHandle};
use crate::routes::error::QueryError;

/// Close code for a subscriber dropped because it could not keep up.
const CLOSE_POLICY: u16 = 1008;
/// Close code for server shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;
const CLOSE_NORMAL: u16 = 1000;

/// # Application State
///
/// Shared by every live-data handler.
#[derive(Debug, Clone)]
pub struct LiveState {
    pub registry: Arc<ConnectionRegistry>,
    pub stats: Arc<PipelineStats>,
    /// Outbound frames buffered per subscriber before it is evicted.
    pub queue_capacity: usize,
    /// Longest a single socket write may take.
    pub write_timeout: Duration,
}

pub fn router(state: LiveState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/ws/{channel}", get(ws_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<LiveState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "subscribers": state.registry.total(),
    }))
}

async fn stats_handler(State(state): State<LiveState>) -> impl IntoResponse {
    Json(json!({
        "pipeline": state.stats.snapshot(),
        "subscribers": {
            "raw": state.registry.len(Channel::Raw),
            "structured": state.registry.len(Channel::Structured),
        },
    }))
}

/// # WebSocket Upgrade Handler
///
/// Rejects unknown channels with 404 before the handshake.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(channel): Path<String>,
    State(state): State<LiveState>,
) -> Result<Response, QueryError> {
    let channel: Channel = channel.parse().map_err(QueryError::UnknownRoute)?;
    Ok(ws.on_upgrade(move |socket| serve_subscriber(socket, state, channel)))
}

/// # Subscriber Session
///
/// Registers the connection, then drains its outbound queue into the socket
/// until the client leaves, a write fails, or the connection is evicted (slow
/// consumer, shutdown). In every case the registry entry is removed exactly
/// once.
pub async fn serve_subscriber(socket: WebSocket, state: LiveState, channel: Channel) {
    let (handle, mut queue) = SubscriberHandle::new(channel, state.queue_capacity);
    let liveness = handle.liveness();
    if !state.registry.register(&handle) {
        return;
    }
    info!(connection = handle.id(), %channel, "subscriber connected");

    let (mut sink, mut incoming) = socket.split();

    let reason = loop {
        tokio::select! {
            biased;

            _ = liveness.cancelled() => {
                let (code, text) = match handle.evict_reason() {
                    Some(EvictReason::QueueFull) => (CLOSE_POLICY, "slow consumer"),
                    Some(EvictReason::Shutdown) => (CLOSE_GOING_AWAY, "server shutting down"),
                    _ => (CLOSE_NORMAL, ""),
                };
                let close = Message::Close(Some(CloseFrame {
                    code,
                    reason: Utf8Bytes::from(text),
                }));
                let _ = timeout(state.write_timeout, sink.send(close)).await;
                break None;
            }

            frame = queue.recv() => {
                let Some(frame) = frame else {
                    break Some(EvictReason::ReceiverGone);
                };
                match timeout(state.write_timeout, sink.send(text_message(frame))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(connection = handle.id(), error = %e, "socket write failed");
                        break Some(EvictReason::WriteFailed);
                    }
                    Err(_) => {
                        debug!(connection = handle.id(), "socket write timed out");
                        break Some(EvictReason::WriteFailed);
                    }
                }
            }

            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Some(EvictReason::ClientClosed),
                Some(Ok(_)) => {}
            },
        }
    };

    if let Some(reason) = reason {
        if state.registry.evict(&handle, reason) {
            state.stats.record_disconnect();
        }
    }
}

/// Event payloads are JSON, so they go out as text frames.
fn text_message(frame: Bytes) -> Message {
    match std::str::from_utf8(&frame) {
        Ok(text) => Message::Text(Utf8Bytes::from(text)),
        Err(_) => Message::Binary(frame),
    }
}
