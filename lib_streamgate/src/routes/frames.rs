//! Conversions between axum WebSocket messages and relay frames.

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};

use crate::error::TunnelError;
use crate::retrieve::tunnel::{CloseInfo, RelayFrame};

pub fn to_axum(frame: RelayFrame) -> Message {
    match frame {
        RelayFrame::Text(text) => Message::Text(Utf8Bytes::from(text)),
        RelayFrame::Binary(data) => Message::Binary(data),
        RelayFrame::Ping(data) => Message::Ping(data),
        RelayFrame::Pong(data) => Message::Pong(data),
        RelayFrame::Close(info) => Message::Close(info.map(|info| CloseFrame {
            code: info.code,
            reason: Utf8Bytes::from(info.reason),
        })),
    }
}

pub fn from_axum(message: Message) -> RelayFrame {
    match message {
        Message::Text(text) => RelayFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => RelayFrame::Binary(data),
        Message::Ping(data) => RelayFrame::Ping(data),
        Message::Pong(data) => RelayFrame::Pong(data),
        Message::Close(frame) => RelayFrame::Close(frame.map(|f| CloseInfo {
            code: f.code,
            reason: f.reason.as_str().to_owned(),
        })),
    }
}

/// Splits an accepted client socket into a `RelayFrame` sink and stream.
pub fn client_legs(
    socket: WebSocket,
) -> (
    impl Sink<RelayFrame, Error = TunnelError> + Unpin,
    impl Stream<Item = Result<RelayFrame, TunnelError>> + Unpin,
) {
    let (sink, stream) = socket.split();
    let sink = sink
        .sink_map_err(|e| TunnelError::Client(e.to_string()))
        .with(|frame: RelayFrame| future::ready(Ok::<_, TunnelError>(to_axum(frame))));
    let stream = stream.map(|message| {
        message
            .map(from_axum)
            .map_err(|e| TunnelError::Client(e.to_string()))
    });
    (sink, stream)
}
