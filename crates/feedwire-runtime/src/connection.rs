//! Connection manager.
//!
//! Owns one socket task per connection key. Connect intents are deduplicated
//! against [`WsState`]; intents that arrive while a socket is still opening are
//! parked and fanned out as `SubscriptionReady` once it opens. On close, every
//! active subscription of the connection gets an `UnsubscribeFulfilled` before
//! the single `DisconnectFulfilled`.
//!
//! A disconnect drops the intents parked on its socket. Intents that arrive
//! while the socket is closing wait for it to go away and are then re-issued
//! against a fresh socket; a closing socket that reports open is ignored.
//!
//! Socket tasks report back with [`Command`]s tagged with an epoch. Reports from
//! a superseded socket are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use feedwire_core::events::{
    ConnectPayload, ConnectionInfo, ConnectionPayload, ErrorPayload, SubscriptionPayload, WsEvent,
};
use feedwire_core::redact::redact_url;
use feedwire_core::{ConnectionKey, WsHandler};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::{CloseReason, Command, CommandSender};
use crate::store::WsState;
use crate::transport::{SocketFrame, WsTransport};

struct SocketHandle {
    epoch: u64,
    handler: Arc<dyn WsHandler>,
    url: String,
    outbound: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
    pending: Vec<ConnectPayload>,
}

impl SocketHandle {
    fn is_open(&self) -> bool {
        self.outbound.is_some()
    }

    /// A disconnect was requested and the socket task has not reported back yet.
    fn is_closing(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Opens, tracks and tears down provider sockets.
pub(crate) struct ConnectionManager {
    transport: Arc<dyn WsTransport>,
    commands: CommandSender,
    sockets: HashMap<ConnectionKey, SocketHandle>,
    next_epoch: u64,
}

impl ConnectionManager {
    pub(crate) fn new(transport: Arc<dyn WsTransport>, commands: CommandSender) -> Self {
        Self {
            transport,
            commands,
            sockets: HashMap::new(),
            next_epoch: 0,
        }
    }

    /// React to an event that has already been reduced into `state`.
    pub(crate) fn handle(&mut self, event: &WsEvent, state: &WsState, out: &mut Vec<WsEvent>) {
        match event {
            WsEvent::ConnectRequested(p) => self.on_connect_requested(p, state, out),
            WsEvent::DisconnectRequested(p) => {
                if let Some(socket) = self.sockets.get_mut(&p.connection_key) {
                    info!(connection_key = %p.connection_key, url = %socket.url, "disconnecting");
                    socket.cancel.cancel();
                    socket.pending.clear();
                }
            }
            WsEvent::DisconnectFulfilled(p) => {
                if let Some(socket) = self.sockets.remove(&p.connection_key) {
                    socket.cancel.cancel();
                    info!(connection_key = %p.connection_key, url = %socket.url, "disconnected");
                }
            }
            _ => {}
        }
    }

    fn on_connect_requested(&mut self, p: &ConnectPayload, state: &WsState, out: &mut Vec<WsEvent>) {
        let key = &p.connection_key;
        if let Some(socket) = self.sockets.get_mut(key).filter(|s| s.is_closing()) {
            debug!(connection_key = %key, "socket is closing, connect intent parked until it is gone");
            socket.pending.push(p.clone());
            return;
        }
        if state.is_connection_active(key) {
            match self.sockets.get(key) {
                Some(socket) if socket.is_open() => out.push(WsEvent::SubscriptionReady(p.clone())),
                _ => debug!(connection_key = %key, "connection active without an open socket"),
            }
            return;
        }

        let connecting = state.connection(key).map_or(0, |c| c.connecting);
        if connecting > 1 {
            match self.sockets.get_mut(key) {
                Some(socket) => socket.pending.push(p.clone()),
                None => debug!(connection_key = %key, "dropping connect intent with no socket"),
            }
            return;
        }

        self.start(p);
    }

    fn start(&mut self, p: &ConnectPayload) {
        if let Some(stale) = self.sockets.remove(&p.connection_key) {
            stale.cancel.cancel();
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let cancel = CancellationToken::new();
        let url = redact_url(&p.handler.connection().url);
        debug!(connection_key = %p.connection_key, %url, epoch, "opening socket");

        let _ = tokio::spawn(run_socket(
            Arc::clone(&self.transport),
            self.commands.clone(),
            p.clone(),
            epoch,
            cancel.clone(),
        ));

        let _ = self.sockets.insert(
            p.connection_key.clone(),
            SocketHandle {
                epoch,
                handler: Arc::clone(&p.handler),
                url,
                outbound: None,
                cancel,
                pending: vec![p.clone()],
            },
        );
    }

    /// Whether `epoch` is the live socket for `key`.
    pub(crate) fn is_current(&self, key: &ConnectionKey, epoch: u64) -> bool {
        self.sockets.get(key).is_some_and(|s| s.epoch == epoch)
    }

    pub(crate) fn on_open(
        &mut self,
        key: &ConnectionKey,
        epoch: u64,
        url: String,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Vec<WsEvent> {
        let Some(socket) = self.sockets.get_mut(key).filter(|s| s.epoch == epoch) else {
            debug!(connection_key = %key, epoch, "ignoring open from stale socket");
            return Vec::new();
        };
        if socket.is_closing() {
            debug!(connection_key = %key, epoch, "ignoring open from closing socket");
            return Vec::new();
        }
        socket.url = url;
        socket.outbound = Some(outbound);
        info!(connection_key = %key, url = %socket.url, "connected");

        let mut events = vec![WsEvent::ConnectFulfilled(ConnectionPayload {
            connection_key: key.clone(),
            handler: Arc::clone(&socket.handler),
        })];
        events.extend(socket.pending.drain(..).map(WsEvent::SubscriptionReady));
        events
    }

    pub(crate) fn on_connect_failed(
        &mut self,
        key: &ConnectionKey,
        epoch: u64,
        reason: String,
    ) -> Vec<WsEvent> {
        if !self.is_current(key, epoch) {
            return Vec::new();
        }
        let info = self.connection_info(key);
        let Some(socket) = self.sockets.remove(key) else {
            return Vec::new();
        };
        error!(connection_key = %key, url = %info.url, %reason, "connection failed");
        let mut events = vec![WsEvent::ConnectFailed(ErrorPayload {
            connection_info: info,
            reason,
        })];
        if socket.is_closing() {
            events.extend(socket.pending.into_iter().map(WsEvent::ConnectRequested));
        }
        events
    }

    pub(crate) fn on_closed(
        &mut self,
        key: &ConnectionKey,
        epoch: u64,
        reason: &CloseReason,
        state: &WsState,
    ) -> Vec<WsEvent> {
        let Some(socket) = self.sockets.get(key).filter(|s| s.epoch == epoch) else {
            return Vec::new();
        };
        let info = self.connection_info(key);
        let mut events = Vec::new();

        match reason {
            CloseReason::Requested => info!(connection_key = %key, "closing websocket connection"),
            CloseReason::Remote(close) => info!(
                connection_key = %key,
                code = close.as_ref().map(|c| c.code),
                reason = close.as_ref().map(|c| c.reason.as_str()),
                "closing websocket connection"
            ),
            CloseReason::Error(err) => {
                error!(connection_key = %key, url = %info.url, error = %err, "socket error");
                events.push(WsEvent::ConnectFailed(ErrorPayload {
                    connection_info: info.clone(),
                    reason: err.clone(),
                }));
            }
        }

        if socket.is_open() {
            events.extend(state.active_subscriptions_of(key).map(|(sub_key, sub)| {
                WsEvent::UnsubscribeFulfilled(SubscriptionPayload {
                    connection_info: info.clone(),
                    subscription_key: sub_key.clone(),
                    subscribe_message: sub.subscribe_message.clone(),
                    input: sub.input.clone(),
                    context: sub.context.clone(),
                })
            }));
        }
        events.push(WsEvent::DisconnectFulfilled(ConnectionPayload {
            connection_key: key.clone(),
            handler: Arc::clone(&socket.handler),
        }));
        // Intents that arrived after the disconnect get a fresh socket.
        events.extend(socket.pending.iter().cloned().map(WsEvent::ConnectRequested));
        events
    }

    /// Synthesize the teardown of every connection, cancelling their sockets.
    pub(crate) fn teardown_all(&mut self, state: &WsState) -> Vec<WsEvent> {
        let mut keys: Vec<(ConnectionKey, u64)> =
            self.sockets.iter().map(|(k, s)| (k.clone(), s.epoch)).collect();
        keys.sort();
        keys.into_iter()
            .flat_map(|(key, epoch)| {
                if let Some(socket) = self.sockets.get_mut(&key) {
                    socket.cancel.cancel();
                    socket.pending.clear();
                }
                self.on_closed(&key, epoch, &CloseReason::Requested, state)
            })
            .collect()
    }

    /// Provider codec of a connection with a live socket.
    pub(crate) fn handler(&self, key: &ConnectionKey) -> Option<Arc<dyn WsHandler>> {
        self.sockets.get(key).map(|s| Arc::clone(&s.handler))
    }

    /// Key and redacted URL of a connection.
    pub(crate) fn connection_info(&self, key: &ConnectionKey) -> ConnectionInfo {
        ConnectionInfo {
            key: key.clone(),
            url: self
                .sockets
                .get(key)
                .map_or_else(|| redact_url(key.as_str()), |s| s.url.clone()),
        }
    }

    /// Queue a message on an open socket. Strings go out verbatim.
    pub(crate) fn send(&self, key: &ConnectionKey, message: &Value) -> bool {
        let Some(outbound) = self.sockets.get(key).and_then(|s| s.outbound.as_ref()) else {
            warn!(connection_key = %key, "no open socket to send on");
            return false;
        };
        outbound.send(encode(message)).is_ok()
    }
}

/// Wire text of an outbound message.
pub(crate) fn encode(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parse an inbound frame, falling back to the raw text.
pub(crate) fn parse_frame(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| {
        debug!("message received with invalid format");
        Value::String(text.to_owned())
    })
}

/// Parse a binary frame as UTF-8 text. Bytes that are not UTF-8 are delivered
/// unchanged as an array of byte values.
pub(crate) fn parse_binary_frame(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => parse_frame(&text),
        Err(e) => {
            debug!("binary message received that is not UTF-8");
            Value::Array(e.into_bytes().into_iter().map(Value::from).collect())
        }
    }
}

async fn run_socket(
    transport: Arc<dyn WsTransport>,
    commands: CommandSender,
    payload: ConnectPayload,
    epoch: u64,
    cancel: CancellationToken,
) {
    let key = payload.connection_key.clone();
    let handler = Arc::clone(&payload.handler);
    let descriptor = handler.connection();

    let fail = |reason: String| {
        let _ = commands.send(Command::ConnectFailed {
            key: key.clone(),
            epoch,
            reason,
        });
    };
    let closed = |reason: CloseReason| {
        let _ = commands.send(Command::SocketClosed {
            key: key.clone(),
            epoch,
            reason,
        });
    };

    let resolved = tokio::select! {
        () = cancel.cancelled() => return closed(CloseReason::Requested),
        resolved = handler.resolve_url(&payload.request) => resolved,
    };
    let url = match resolved {
        Ok(Some(url)) => url,
        Ok(None) => descriptor.url,
        Err(e) => return fail(e.to_string()),
    };

    let connected = tokio::select! {
        () = cancel.cancelled() => return closed(CloseReason::Requested),
        connected = transport.connect(&url, descriptor.protocol.as_deref()) => connected,
    };
    let socket = match connected {
        Ok(socket) => socket,
        Err(e) => return fail(e.to_string()),
    };
    let mut sink = socket.sink;
    let mut stream = socket.stream;

    if let Some(message) = handler.on_connect(&payload.request) {
        if let Err(e) = sink.send(encode(&message)).await {
            return fail(e.to_string());
        }
    }

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let _ = commands.send(Command::SocketOpened {
        key: key.clone(),
        epoch,
        url: redact_url(&url),
        outbound: outbound_tx,
    });

    let reason = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = sink.close().await;
                break CloseReason::Requested;
            }
            Some(text) = outbound_rx.recv() => {
                if let Err(e) = sink.send(text).await {
                    break CloseReason::Error(e.to_string());
                }
            }
            frame = stream.next() => {
                let message = match frame {
                    Some(Ok(SocketFrame::Text(text))) => parse_frame(&text),
                    Some(Ok(SocketFrame::Binary(bytes))) => parse_binary_frame(bytes),
                    Some(Ok(SocketFrame::Close(info))) => break CloseReason::Remote(info),
                    Some(Err(e)) => break CloseReason::Error(e.to_string()),
                    None => break CloseReason::Remote(None),
                };
                let _ = commands.send(Command::SocketFrame {
                    key: key.clone(),
                    epoch,
                    message,
                });
            }
        }
    };
    closed(reason);
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
