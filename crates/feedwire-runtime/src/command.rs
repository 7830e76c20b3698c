//! Messages into the orchestrator task.
//!
//! Socket tasks and timers never touch state. They report back through
//! [`Command`]s and the orchestrator turns them into events.

use feedwire_core::events::WsEvent;
use feedwire_core::{ConnectionKey, SubscriptionKey};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::transport::CloseInfo;

/// Sender half of the orchestrator command channel.
pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;

/// Which watcher armed a timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    /// Idle-timeout reaper.
    Idle,
    /// Unresponsive-channel monitor.
    Unresponsive,
}

/// Why a socket task ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// Cancelled by a disconnect intent.
    Requested,
    /// The peer closed or the stream ended.
    Remote(Option<CloseInfo>),
    /// A read or write failed.
    Error(String),
}

#[derive(Debug)]
pub(crate) enum Command {
    /// Process an event.
    Dispatch(WsEvent),
    /// Tear down a connection by key.
    Disconnect(ConnectionKey),
    /// Tear down a subscription by key.
    Unsubscribe(SubscriptionKey),
    /// A socket opened. `url` is redacted.
    SocketOpened {
        key: ConnectionKey,
        epoch: u64,
        url: String,
        outbound: mpsc::UnboundedSender<String>,
    },
    /// A socket delivered a frame.
    SocketFrame {
        key: ConnectionKey,
        epoch: u64,
        message: Value,
    },
    /// A socket task ended.
    SocketClosed {
        key: ConnectionKey,
        epoch: u64,
        reason: CloseReason,
    },
    /// A socket never opened.
    ConnectFailed {
        key: ConnectionKey,
        epoch: u64,
        reason: String,
    },
    /// A reaper or monitor timer fired.
    TimerElapsed {
        kind: TimerKind,
        key: SubscriptionKey,
        generation: u64,
    },
    /// Disconnect everything and stop.
    Shutdown(oneshot::Sender<()>),
}
