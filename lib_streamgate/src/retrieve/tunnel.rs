//! # WebSocket Tunnel
//!
//! Copies frames between a client WebSocket and an upstream one until either
//! side goes away. Frames are forwarded one at a time, untouched and without
//! buffering; a close or error on one leg closes the other.
//!
//! The relay loop is written against plain `Sink`/`Stream` pairs of
//! `RelayFrame`, so the server side (axum) and the upstream side
//! (tokio-tungstenite) only need a frame conversion each.
//!
//! Control frames stay on their own leg: each WebSocket library answers pings
//! itself, so pings and pongs only count as activity for the idle timer.

use bytes::Bytes;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::error::TunnelError;

/// Close code sent when a leg has been idle for too long ("going away").
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
}

/// A WebSocket frame, independent of the library that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseInfo>),
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    ClientClosed,
    UpstreamClosed,
    ClientIdle,
    UpstreamIdle,
}

#[derive(Clone, Copy)]
enum Side {
    Client,
    Upstream,
}

impl Side {
    fn error(self, reason: impl ToString) -> TunnelError {
        match self {
            Side::Client => TunnelError::Client(reason.to_string()),
            Side::Upstream => TunnelError::Upstream(reason.to_string()),
        }
    }
}

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens the upstream WebSocket, giving up after `connect_timeout`.
pub async fn connect_upstream(url: &str, connect_timeout: Duration) -> Result<UpstreamSocket, TunnelError> {
    let failed = |reason: String| TunnelError::Connect {
        url: url.to_string(),
        reason,
    };
    match timeout(connect_timeout, connect_async(url)).await {
        Ok(Ok((socket, response))) => {
            debug!(%url, status = %response.status(), "upstream stream opened");
            Ok(socket)
        }
        Ok(Err(e)) => Err(failed(e.to_string())),
        Err(_) => Err(failed(format!("no answer within {:?}", connect_timeout))),
    }
}

/// Splits an upstream socket into a `RelayFrame` sink and stream.
pub fn upstream_legs(
    socket: UpstreamSocket,
) -> (
    impl Sink<RelayFrame, Error = TunnelError> + Unpin,
    impl Stream<Item = Result<RelayFrame, TunnelError>> + Unpin,
) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TunnelError::Upstream(e.to_string()))
        .with(|frame: RelayFrame| future::ready(Ok::<_, TunnelError>(to_tungstenite(frame))));
    let stream = stream.filter_map(|message| {
        future::ready(match message {
            Ok(message) => from_tungstenite(message).map(Ok),
            Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => None,
            Err(e) => Some(Err(TunnelError::Upstream(e.to_string()))),
        })
    });
    (sink, stream)
}

pub fn to_tungstenite(frame: RelayFrame) -> Message {
    match frame {
        RelayFrame::Text(text) => Message::Text(text.into()),
        RelayFrame::Binary(data) => Message::Binary(data),
        RelayFrame::Ping(data) => Message::Ping(data),
        RelayFrame::Pong(data) => Message::Pong(data),
        RelayFrame::Close(info) => Message::Close(info.map(|info| CloseFrame {
            code: CloseCode::from(info.code),
            reason: info.reason.into(),
        })),
    }
}

pub fn from_tungstenite(message: Message) -> Option<RelayFrame> {
    Some(match message {
        Message::Text(text) => RelayFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => RelayFrame::Binary(data),
        Message::Ping(data) => RelayFrame::Ping(data),
        Message::Pong(data) => RelayFrame::Pong(data),
        Message::Close(frame) => RelayFrame::Close(frame.map(|f| CloseInfo {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        })),
        Message::Frame(_) => return None,
    })
}

/// # Relay
///
/// Pumps frames both ways until one side closes, fails, or stays silent for
/// `idle`. A leg counts as active whenever a frame is read from it or written
/// to it. Writes are bounded by `idle` as well, so a stalled peer cannot hold
/// the session open.
pub async fn relay<CS, CR, US, UR>(
    mut client_tx: CS,
    mut client_rx: CR,
    mut upstream_tx: US,
    mut upstream_rx: UR,
    idle: Duration,
) -> Result<RelayEnd, TunnelError>
where
    CS: Sink<RelayFrame, Error = TunnelError> + Unpin,
    CR: Stream<Item = Result<RelayFrame, TunnelError>> + Unpin,
    US: Sink<RelayFrame, Error = TunnelError> + Unpin,
    UR: Stream<Item = Result<RelayFrame, TunnelError>> + Unpin,
{
    let client_idle = sleep(idle);
    let upstream_idle = sleep(idle);
    tokio::pin!(client_idle, upstream_idle);

    let outcome = loop {
        tokio::select! {
            frame = client_rx.next() => match frame {
                None => {
                    finish(&mut upstream_tx, None).await;
                    break Ok(RelayEnd::ClientClosed);
                }
                Some(Err(e)) => {
                    finish(&mut upstream_tx, None).await;
                    break Err(e);
                }
                Some(Ok(RelayFrame::Close(info))) => {
                    finish(&mut upstream_tx, info).await;
                    break Ok(RelayEnd::ClientClosed);
                }
                Some(Ok(RelayFrame::Ping(_))) | Some(Ok(RelayFrame::Pong(_))) => {
                    client_idle.as_mut().reset(Instant::now() + idle);
                }
                Some(Ok(frame)) => {
                    client_idle.as_mut().reset(Instant::now() + idle);
                    if let Err(e) = forward(&mut upstream_tx, frame, idle, Side::Upstream).await {
                        finish(&mut client_tx, None).await;
                        break Err(e);
                    }
                    upstream_idle.as_mut().reset(Instant::now() + idle);
                }
            },
            frame = upstream_rx.next() => match frame {
                None => {
                    finish(&mut client_tx, None).await;
                    break Ok(RelayEnd::UpstreamClosed);
                }
                Some(Err(e)) => {
                    finish(&mut client_tx, None).await;
                    break Err(e);
                }
                Some(Ok(RelayFrame::Close(info))) => {
                    finish(&mut client_tx, info).await;
                    break Ok(RelayEnd::UpstreamClosed);
                }
                Some(Ok(RelayFrame::Ping(_))) | Some(Ok(RelayFrame::Pong(_))) => {
                    upstream_idle.as_mut().reset(Instant::now() + idle);
                }
                Some(Ok(frame)) => {
                    upstream_idle.as_mut().reset(Instant::now() + idle);
                    if let Err(e) = forward(&mut client_tx, frame, idle, Side::Client).await {
                        finish(&mut upstream_tx, None).await;
                        break Err(e);
                    }
                    client_idle.as_mut().reset(Instant::now() + idle);
                }
            },
            _ = &mut client_idle => {
                let going_away = idle_close();
                finish(&mut client_tx, going_away.clone()).await;
                finish(&mut upstream_tx, going_away).await;
                break Ok(RelayEnd::ClientIdle);
            },
            _ = &mut upstream_idle => {
                let going_away = idle_close();
                finish(&mut upstream_tx, going_away.clone()).await;
                finish(&mut client_tx, going_away).await;
                break Ok(RelayEnd::UpstreamIdle);
            },
        }
    };

    match &outcome {
        Ok(end) => info!(?end, "tunnel closed"),
        Err(e) => info!(error = %e, "tunnel aborted"),
    }
    outcome
}

fn idle_close() -> Option<CloseInfo> {
    Some(CloseInfo {
        code: CLOSE_GOING_AWAY,
        reason: "idle timeout".into(),
    })
}

async fn forward<S>(tx: &mut S, frame: RelayFrame, limit: Duration, side: Side) -> Result<(), TunnelError>
where
    S: Sink<RelayFrame, Error = TunnelError> + Unpin,
{
    match timeout(limit, tx.send(frame)).await {
        Ok(result) => result,
        Err(_) => Err(side.error("write timed out")),
    }
}

/// Best-effort close of one leg; the peer may already be gone.
async fn finish<S>(tx: &mut S, info: Option<CloseInfo>)
where
    S: Sink<RelayFrame, Error = TunnelError> + Unpin,
{
    let grace = Duration::from_secs(1);
    let _ = timeout(grace, tx.send(RelayFrame::Close(info))).await;
    let _ = timeout(grace, tx.close()).await;
}
