//! Shared test fixtures: a toy provider codec and an in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use feedwire_core::events::{ConnectPayload, ConnectionInfo, ConnectionPayload, SubscriptionPayload};
use feedwire_core::{
    AdapterContext, AdapterRequest, AdapterResponse, ConnectionDescriptor, HandlerError, WsEvent,
    WsHandler,
};
use futures::channel::mpsc as fmpsc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};

use crate::command::Command;
use crate::connection::ConnectionManager;
use crate::errors::TransportError;
use crate::store::WsState;
use crate::transport::{SocketFrame, WsSocket, WsTransport};

/// Subscribes with `{"sub": pair|asset}` and reads prices from `{"sub", "price"}` frames.
#[derive(Clone, Debug, Default)]
pub(crate) struct EchoHandler {
    url: String,
    resolved_url: Option<String>,
    on_connect: Option<Value>,
    save_params: bool,
}

impl EchoHandler {
    pub(crate) fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            ..Self::default()
        }
    }

    pub(crate) fn with_on_connect(mut self, message: Value) -> Self {
        self.on_connect = Some(message);
        self
    }

    pub(crate) fn with_saved_params(mut self) -> Self {
        self.save_params = true;
        self
    }

    pub(crate) fn with_resolved_url(mut self, url: &str) -> Self {
        self.resolved_url = Some(url.to_owned());
        self
    }
}

#[async_trait]
impl WsHandler for EchoHandler {
    fn connection(&self) -> ConnectionDescriptor {
        ConnectionDescriptor::new(self.url.clone())
    }

    async fn resolve_url(&self, _request: &AdapterRequest) -> Result<Option<String>, HandlerError> {
        Ok(self.resolved_url.clone())
    }

    fn subscribe(&self, input: &AdapterRequest) -> Option<Value> {
        input
            .param("pair")
            .or_else(|| input.param("asset"))
            .map(|sub| json!({ "sub": sub }))
    }

    fn unsubscribe(&self, input: &AdapterRequest, params: Option<&Value>) -> Option<Value> {
        let sub = self.subscribe(input)?;
        Some(json!({ "unsub": sub["sub"], "params": params }))
    }

    fn is_error(&self, message: &Value) -> bool {
        message.get("error").is_some()
    }

    fn subscription_from_message(
        &self,
        message: &Value,
        _subscribe_message: &Value,
        _input: &AdapterRequest,
    ) -> Option<Value> {
        message.get("sub").map(|sub| json!({ "sub": sub }))
    }

    async fn to_response(&self, message: &Value, input: &AdapterRequest) -> Option<AdapterResponse> {
        let price = message.get("price")?;
        Some(AdapterResponse::success(input, price.clone(), message.clone()))
    }

    fn filter(&self, message: &Value) -> bool {
        message.get("type").and_then(Value::as_str) != Some("heartbeat")
    }

    fn on_connect(&self, _request: &AdapterRequest) -> Option<Value> {
        self.on_connect.clone()
    }

    fn save_from_first_message(&self, message: &Value) -> Option<Value> {
        if !self.save_params {
            return None;
        }
        message.get("channelId").map(|id| json!({ "channelId": id }))
    }
}

type Inbound = fmpsc::UnboundedSender<Result<SocketFrame, TransportError>>;

struct ScriptedSocket {
    url: String,
    sent: Arc<Mutex<Vec<String>>>,
    inbound: Inbound,
}

#[derive(Default)]
struct Script {
    sockets: Vec<ScriptedSocket>,
    fail_next: Option<String>,
}

/// In-memory transport. Sockets are numbered in connect order.
#[derive(Clone, Default)]
pub(crate) struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub(crate) fn connect_count(&self) -> usize {
        self.script.lock().sockets.len()
    }

    pub(crate) fn url(&self, socket: usize) -> String {
        self.script.lock().sockets[socket].url.clone()
    }

    /// Frames written to a socket, in order.
    pub(crate) fn sent(&self, socket: usize) -> Vec<String> {
        self.script.lock().sockets[socket].sent.lock().clone()
    }

    pub(crate) fn sent_json(&self, socket: usize) -> Vec<Value> {
        self.sent(socket)
            .iter()
            .map(|text| serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.clone())))
            .collect()
    }

    pub(crate) fn push(&self, socket: usize, message: Value) {
        self.inject(socket, Ok(SocketFrame::Text(message.to_string())));
    }

    pub(crate) fn push_raw(&self, socket: usize, text: &str) {
        self.inject(socket, Ok(SocketFrame::Text(text.to_owned())));
    }

    /// Peer closes the socket.
    pub(crate) fn close(&self, socket: usize) {
        self.inject(socket, Ok(SocketFrame::Close(None)));
    }

    /// The socket fails mid-stream.
    pub(crate) fn fail(&self, socket: usize, reason: &str) {
        self.inject(socket, Err(TransportError::Socket(reason.to_owned())));
    }

    pub(crate) fn fail_next_connect(&self, reason: &str) {
        self.script.lock().fail_next = Some(reason.to_owned());
    }

    fn inject(&self, socket: usize, frame: Result<SocketFrame, TransportError>) {
        let _ = self.script.lock().sockets[socket].inbound.unbounded_send(frame);
    }
}

#[async_trait]
impl WsTransport for ScriptedTransport {
    async fn connect(&self, url: &str, _protocol: Option<&str>) -> Result<WsSocket, TransportError> {
        let mut script = self.script.lock();
        if let Some(reason) = script.fail_next.take() {
            return Err(TransportError::Connect(reason));
        }

        let sent = Arc::new(Mutex::new(Vec::new()));
        let (inbound, stream) = fmpsc::unbounded();
        script.sockets.push(ScriptedSocket {
            url: url.to_owned(),
            sent: Arc::clone(&sent),
            inbound,
        });

        let sink = futures::sink::unfold(sent, |sent, text: String| async move {
            sent.lock().push(text);
            Ok::<_, TransportError>(sent)
        });
        Ok(WsSocket {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

pub(crate) fn connect_payload(url: &str, data: Value) -> ConnectPayload {
    ConnectPayload {
        connection_key: url.into(),
        handler: Arc::new(EchoHandler::new(url)),
        request: AdapterRequest::new("1", data),
        context: AdapterContext::default(),
    }
}

pub(crate) fn connection_payload(url: &str) -> ConnectionPayload {
    ConnectionPayload {
        connection_key: url.into(),
        handler: Arc::new(EchoHandler::new(url)),
    }
}

pub(crate) fn subscription_payload(url: &str, data: Value) -> SubscriptionPayload {
    let input = AdapterRequest::new("1", data);
    let message = EchoHandler::new(url)
        .subscribe(&input)
        .unwrap_or_else(|| json!({}));
    SubscriptionPayload::new(
        ConnectionInfo {
            key: url.into(),
            url: url.to_owned(),
        },
        message,
        input,
        AdapterContext::default(),
    )
}

/// A manager with one open socket for `payload`, and the state that produced it.
pub(crate) async fn open_connection(
    payload: ConnectPayload,
) -> (ConnectionManager, WsState, ScriptedTransport, mpsc::UnboundedReceiver<Command>) {
    let transport = ScriptedTransport::default();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut connections = ConnectionManager::new(Arc::new(transport.clone()), tx);
    let mut state = WsState::default();
    let event = WsEvent::ConnectRequested(payload);
    state.reduce(&event);
    connections.handle(&event, &state, &mut Vec::new());
    settle().await;
    let Ok(Command::SocketOpened { key, epoch, url, outbound }) = rx.try_recv() else {
        panic!("socket did not open");
    };
    for event in connections.on_open(&key, epoch, url, outbound) {
        state.reduce(&event);
    }
    (connections, state, transport, rx)
}

/// Let every ready task run. Time is paused in these tests, so this only
/// advances the clock by a millisecond.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Everything currently buffered on an event tap.
pub(crate) fn drain(events: &mut broadcast::Receiver<WsEvent>) -> Vec<WsEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub(crate) fn names(events: &[WsEvent]) -> Vec<&'static str> {
    events.iter().map(WsEvent::event_type).collect()
}
