//! The orchestrator task and its handle.
//!
//! One task owns [`WsState`] and every component. Commands from callers,
//! sockets and timers arrive on a single channel; each becomes zero or more
//! events. Events are processed one at a time, depth-first: an event's
//! follow-ups run before the next queued event.
//!
//! For each event the task:
//! 1. records metrics against the pre-event state,
//! 2. reduces it into the state,
//! 3. publishes it on the event tap,
//! 4. hands it to the connection manager, multiplexer, reaper, monitor and
//!    cache bridge, in that order.
//!
//! The state snapshot is republished after every command.

use std::collections::VecDeque;
use std::sync::Arc;

use feedwire_core::batch::{BatchSplitter, SingleRequest};
use feedwire_core::cache::{Cache, LocalCache};
use feedwire_core::events::{ConnectPayload, ConnectionPayload, SubscriptionPayload, WsEvent};
use feedwire_core::{AdapterContext, AdapterRequest, ConnectionKey, SubscriptionKey, WsHandler};
use feedwire_settings::FeedwireSettings;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use crate::bridge::CacheBridge;
use crate::command::{Command, CommandSender, TimerKind};
use crate::connection::ConnectionManager;
use crate::errors::RuntimeError;
use crate::metrics;
use crate::monitor::UnresponsiveMonitor;
use crate::multiplexer::Multiplexer;
use crate::reaper::IdleReaper;
use crate::store::WsState;
use crate::transport::{TungsteniteTransport, WsTransport};

/// Process-scoped collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct Collaborators {
    /// Cache pushed values are written to.
    pub cache: Arc<dyn Cache>,
    /// Opens provider sockets.
    pub transport: Arc<dyn WsTransport>,
    /// Expands one request into the inputs it subscribes to.
    pub splitter: Arc<dyn BatchSplitter>,
}

impl Collaborators {
    /// `cache` with the tungstenite transport and no batch splitting.
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self {
            cache,
            transport: Arc::new(TungsteniteTransport),
            splitter: Arc::new(SingleRequest),
        }
    }

    /// An in-process [`LocalCache`] bounded by `cache.max_items`, with the
    /// tungstenite transport and no batch splitting.
    pub fn from_settings(settings: &FeedwireSettings) -> Self {
        Self::new(Arc::new(LocalCache::new(settings.cache.max_items)))
    }

    /// Replace the transport.
    #[must_use]
    pub fn with_transport(mut self, transport: impl WsTransport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    /// Replace the batch splitting strategy.
    #[must_use]
    pub fn with_splitter(mut self, splitter: impl BatchSplitter) -> Self {
        self.splitter = Arc::new(splitter);
        self
    }
}

/// Handle to a running orchestrator.
///
/// Dropping the handle stops the orchestrator as if [`shutdown`](Self::shutdown)
/// had been called, without waiting for it.
pub struct WsOrchestrator {
    commands: CommandSender,
    events: broadcast::Sender<WsEvent>,
    state: watch::Receiver<WsState>,
}

/// Install the global tracing subscriber from `settings.logging`.
///
/// `RUST_LOG` still wins over the configured level. Only the first call in a
/// process has any effect.
pub fn init_logging(settings: &FeedwireSettings) {
    feedwire_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);
}

impl WsOrchestrator {
    /// Start the orchestrator task. Must be called inside a tokio runtime.
    pub fn spawn(settings: &FeedwireSettings, collaborators: Collaborators) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(settings.ws.event_capacity.max(1));
        let (snapshots, state) = watch::channel(WsState::default());

        let actor = Actor {
            state: WsState::default(),
            connections: ConnectionManager::new(collaborators.transport, commands.clone()),
            multiplexer: Multiplexer::new(collaborators.splitter),
            reaper: IdleReaper::new(settings.ws.subscription_ttl(), commands.clone()),
            monitor: UnresponsiveMonitor::new(
                settings.ws.subscription_unresponsive_ttl(),
                commands.clone(),
            ),
            bridge: CacheBridge::new(collaborators.cache, settings.cache.max_age()),
            events: events.clone(),
            snapshots,
        };
        info!(
            subscription_ttl_ms = settings.ws.subscription_ttl_ms,
            subscription_unresponsive_ttl_ms = settings.ws.subscription_unresponsive_ttl_ms,
            cache_max_age_ms = settings.cache.max_age_ms,
            "websocket orchestrator started"
        );
        let _ = tokio::spawn(actor.run(rx));

        Self {
            commands,
            events,
            state,
        }
    }

    /// Ask for live values of `request` over the connection `connection_key`.
    ///
    /// Opens the connection if needed, subscribes every input of the request
    /// and renews subscriptions that already exist.
    pub fn request(
        &self,
        connection_key: impl Into<ConnectionKey>,
        handler: Arc<dyn WsHandler>,
        request: AdapterRequest,
        context: AdapterContext,
    ) -> Result<(), RuntimeError> {
        self.dispatch(WsEvent::ConnectRequested(ConnectPayload {
            connection_key: connection_key.into(),
            handler,
            request,
            context,
        }))
    }

    /// Close a connection and tear down its subscriptions.
    pub fn disconnect(&self, connection_key: impl Into<ConnectionKey>) -> Result<(), RuntimeError> {
        self.send(Command::Disconnect(connection_key.into()))
    }

    /// Unsubscribe one subscription.
    pub fn unsubscribe(&self, subscription_key: SubscriptionKey) -> Result<(), RuntimeError> {
        self.send(Command::Unsubscribe(subscription_key))
    }

    /// Inject an event as if a component had emitted it.
    pub fn dispatch(&self, event: WsEvent) -> Result<(), RuntimeError> {
        self.send(Command::Dispatch(event))
    }

    /// Every processed event, in processing order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }

    /// Latest state snapshot.
    pub fn state(&self) -> WsState {
        self.state.borrow().clone()
    }

    /// Receiver notified after every processed command.
    pub fn watch_state(&self) -> watch::Receiver<WsState> {
        self.state.clone()
    }

    /// Disconnect everything, cancel all timers and stop the task.
    ///
    /// Resolves once teardown events have been processed.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Shutdown(tx))?;
        rx.await.map_err(|_| RuntimeError::Stopped)
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.send(command).map_err(|_| RuntimeError::Stopped)
    }
}

impl Drop for WsOrchestrator {
    fn drop(&mut self) {
        let (tx, _rx) = oneshot::channel();
        let _ = self.commands.send(Command::Shutdown(tx));
    }
}

struct Actor {
    state: WsState,
    connections: ConnectionManager,
    multiplexer: Multiplexer,
    reaper: IdleReaper,
    monitor: UnresponsiveMonitor,
    bridge: CacheBridge,
    events: broadcast::Sender<WsEvent>,
    snapshots: watch::Sender<WsState>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            if let Command::Shutdown(done) = command {
                self.stop();
                commands.close();
                let _ = done.send(());
                break;
            }
            self.execute(command);
            self.publish();
        }
        info!("websocket orchestrator stopped");
    }

    fn execute(&mut self, command: Command) {
        let events = match command {
            Command::Dispatch(event) => vec![event],
            Command::Disconnect(key) => match self.connections.handler(&key) {
                Some(handler) => vec![WsEvent::DisconnectRequested(ConnectionPayload {
                    connection_key: key,
                    handler,
                })],
                None => {
                    debug!(connection_key = %key, "disconnect for unknown connection");
                    Vec::new()
                }
            },
            Command::Unsubscribe(key) => self
                .stored_subscription(&key)
                .map(WsEvent::UnsubscribeRequested)
                .into_iter()
                .collect(),
            Command::SocketOpened {
                key,
                epoch,
                url,
                outbound,
            } => self.connections.on_open(&key, epoch, url, outbound),
            Command::SocketFrame { key, epoch, message } => {
                if self.connections.is_current(&key, epoch) {
                    self.multiplexer
                        .route_frame(&key, &message, &self.state, &self.connections)
                } else {
                    Vec::new()
                }
            }
            Command::SocketClosed { key, epoch, reason } => {
                self.connections.on_closed(&key, epoch, &reason, &self.state)
            }
            Command::ConnectFailed { key, epoch, reason } => {
                self.connections.on_connect_failed(&key, epoch, reason)
            }
            Command::TimerElapsed {
                kind: TimerKind::Idle,
                key,
                generation,
            } => self.reaper.elapsed(&key, generation).into_iter().collect(),
            Command::TimerElapsed {
                kind: TimerKind::Unresponsive,
                key,
                generation,
            } => self
                .monitor
                .elapsed(&key, generation, &self.state, &self.connections),
            Command::Shutdown(done) => {
                let _ = done.send(());
                Vec::new()
            }
        };
        self.dispatch(events);
    }

    fn dispatch(&mut self, events: Vec<WsEvent>) {
        let mut queue: VecDeque<WsEvent> = events.into();
        while let Some(event) = queue.pop_front() {
            let follow_ups = self.process(&event);
            for next in follow_ups.into_iter().rev() {
                queue.push_front(next);
            }
        }
    }

    fn process(&mut self, event: &WsEvent) -> Vec<WsEvent> {
        trace!(
            event = event.event_type(),
            connection_key = ?event.connection_key(),
            subscription_key = ?event.subscription_key(),
            "processing event"
        );
        metrics::observe(event, &self.state);
        self.state.reduce(event);
        let _ = self.events.send(event.clone());

        let mut out = Vec::new();
        self.connections.handle(event, &self.state, &mut out);
        self.multiplexer
            .handle(event, &self.state, &self.connections, &mut out);
        self.reaper.handle(event);
        self.monitor.handle(event, &self.state);
        self.bridge
            .handle(event, &self.state, &self.connections, &mut out);
        out
    }

    fn stored_subscription(&self, key: &SubscriptionKey) -> Option<SubscriptionPayload> {
        let Some(sub) = self.state.subscription(key) else {
            debug!(subscription_key = %key, "unsubscribe for unknown subscription");
            return None;
        };
        Some(SubscriptionPayload {
            connection_info: self.connections.connection_info(&sub.connection_key),
            subscription_key: key.clone(),
            subscribe_message: sub.subscribe_message.clone(),
            input: sub.input.clone(),
            context: sub.context.clone(),
        })
    }

    fn stop(&mut self) {
        let teardown = self.connections.teardown_all(&self.state);
        self.dispatch(teardown);
        self.reaper.cancel_all();
        self.monitor.cancel_all();
        self.bridge.close();
        self.publish();
    }

    fn publish(&self) {
        let _ = self.snapshots.send_replace(self.state.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
