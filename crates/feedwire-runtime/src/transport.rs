//! Socket transport seam.
//!
//! The connection manager only sees [`WsSocket`]: a text sink and a stream of
//! [`SocketFrame`]s. [`TungsteniteTransport`] is the production implementation;
//! tests substitute an in-memory one.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt, future};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use crate::errors::TransportError;

/// Outbound half of a socket. Accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a socket.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SocketFrame, TransportError>> + Send>>;

/// Close code and reason sent by the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

/// One inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Close frame.
    Close(Option<CloseInfo>),
}

/// An open socket split into its two halves.
pub struct WsSocket {
    /// Outbound text frames.
    pub sink: FrameSink,
    /// Inbound frames. Ends when the peer goes away.
    pub stream: FrameStream,
}

/// Opens sockets.
#[async_trait]
pub trait WsTransport: Send + Sync + 'static {
    /// Open a socket to `url`, requesting `protocol` as the subprotocol if given.
    async fn connect(&self, url: &str, protocol: Option<&str>) -> Result<WsSocket, TransportError>;
}

/// [`WsTransport`] backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteTransport;

#[async_trait]
impl WsTransport for TungsteniteTransport {
    async fn connect(&self, url: &str, protocol: Option<&str>) -> Result<WsSocket, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        if let Some(protocol) = protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));
        let stream = ws_rx.filter_map(|msg| future::ready(to_frame(msg)));

        Ok(WsSocket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Map a tungstenite message to a frame. Control frames other than close are dropped.
fn to_frame(
    msg: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<SocketFrame, TransportError>> {
    match msg {
        Ok(Message::Text(text)) => Some(Ok(SocketFrame::Text(text.as_str().to_owned()))),
        Ok(Message::Binary(bytes)) => Some(Ok(SocketFrame::Binary(bytes.to_vec()))),
        Ok(Message::Close(frame)) => Some(Ok(SocketFrame::Close(frame.map(|f| CloseInfo {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned(),
        })))),
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
