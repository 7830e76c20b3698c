//! The ordered event taxonomy shared by every orchestrator component.
//!
//! Components never mutate state directly. They emit [`WsEvent`]s; a single reducer
//! applies them, and every other component observes them in processing order.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::handler::WsHandler;
use crate::ids::{ConnectionKey, SubscriptionKey};
use crate::request::{AdapterContext, AdapterRequest};

/// Connection identity as carried on subscription events. `url` is always redacted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Owning connection.
    pub key: ConnectionKey,
    /// Redacted socket URL.
    pub url: String,
}

/// Payload of connect intents and connect-ready signals.
#[derive(Clone)]
pub struct ConnectPayload {
    /// Target connection.
    pub connection_key: ConnectionKey,
    /// Provider codec for this connection.
    pub handler: Arc<dyn WsHandler>,
    /// The request that triggered the connect.
    pub request: AdapterRequest,
    /// Caller metadata for the request.
    pub context: AdapterContext,
}

/// Payload of connection lifecycle events.
#[derive(Clone)]
pub struct ConnectionPayload {
    /// Connection the event refers to.
    pub connection_key: ConnectionKey,
    /// Provider codec for this connection.
    pub handler: Arc<dyn WsHandler>,
}

/// Payload of a failed connection attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    /// Connection that failed.
    pub connection_info: ConnectionInfo,
    /// Human-readable cause.
    pub reason: String,
}

/// Payload shared by subscribe and unsubscribe events.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionPayload {
    /// Owning connection.
    pub connection_info: ConnectionInfo,
    /// Digest of `subscribe_message`.
    pub subscription_key: SubscriptionKey,
    /// Provider subscribe message.
    pub subscribe_message: Value,
    /// Input that produced the subscribe message.
    pub input: AdapterRequest,
    /// Caller metadata for the input.
    pub context: AdapterContext,
}

impl SubscriptionPayload {
    /// Build a payload, deriving the subscription key from `subscribe_message`.
    pub fn new(
        connection_info: ConnectionInfo,
        subscribe_message: Value,
        input: AdapterRequest,
        context: AdapterContext,
    ) -> Self {
        Self {
            subscription_key: SubscriptionKey::from_message(&subscribe_message),
            connection_info,
            subscribe_message,
            input,
            context,
        }
    }
}

/// Payload of a subscription-scoped error.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionErrorPayload {
    /// Owning connection.
    pub connection_info: ConnectionInfo,
    /// Human-readable cause, or the serialized provider error frame.
    pub reason: String,
    /// Affected subscription, when known.
    pub subscription_key: Option<SubscriptionKey>,
    /// Subscribe message of the affected subscription, when known.
    pub subscribe_message: Option<Value>,
    /// Input of the affected subscription, when known.
    pub input: Option<AdapterRequest>,
}

/// A pushed message routed to one subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct MessagePayload {
    /// Subscription that accepted the message.
    pub subscription_key: SubscriptionKey,
    /// Parsed frame, or the raw text when it was not valid JSON.
    pub message: Value,
}

/// Params captured from the first message of a subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveFirstMessagePayload {
    /// Subscription the params belong to.
    pub subscription_key: SubscriptionKey,
    /// Extracted params.
    pub params: Value,
}

/// Replacement input for an already-active subscription.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateInputPayload {
    /// Subscription to update.
    pub subscription_key: SubscriptionKey,
    /// New input.
    pub input: AdapterRequest,
}

/// Every event the orchestrator processes.
#[derive(Clone, Debug)]
pub enum WsEvent {
    /// A request needs a live connection.
    ConnectRequested(ConnectPayload),
    /// The socket for a connection opened.
    ConnectFulfilled(ConnectionPayload),
    /// A connection attempt or an open socket failed.
    ConnectFailed(ErrorPayload),
    /// A connection should be closed.
    DisconnectRequested(ConnectionPayload),
    /// A connection is gone and its subscriptions are torn down.
    DisconnectFulfilled(ConnectionPayload),
    /// A connection is open and the request can be fanned out into subscriptions.
    SubscriptionReady(ConnectPayload),
    /// An input needs a live subscription.
    SubscribeRequested(SubscriptionPayload),
    /// The first message for a subscription arrived.
    SubscribeFulfilled(SubscriptionPayload),
    /// A provider error frame or an unresponsive channel.
    SubscriptionError(SubscriptionErrorPayload),
    /// A subscription should be torn down.
    UnsubscribeRequested(SubscriptionPayload),
    /// A subscription is torn down.
    UnsubscribeFulfilled(SubscriptionPayload),
    /// A pushed message was routed to a subscription.
    MessageReceived(MessagePayload),
    /// Session params were captured from a subscription's first message.
    SaveFirstMessageReceived(SaveFirstMessagePayload),
    /// The stored input of an active subscription changed.
    UpdateSubscriptionInput(UpdateInputPayload),
}

impl WsEvent {
    /// Stable event name, used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConnectRequested(_) => "connect_requested",
            Self::ConnectFulfilled(_) => "connect_fulfilled",
            Self::ConnectFailed(_) => "connect_failed",
            Self::DisconnectRequested(_) => "disconnect_requested",
            Self::DisconnectFulfilled(_) => "disconnect_fulfilled",
            Self::SubscriptionReady(_) => "subscription_ready",
            Self::SubscribeRequested(_) => "subscribe_requested",
            Self::SubscribeFulfilled(_) => "subscribe_fulfilled",
            Self::SubscriptionError(_) => "subscription_error",
            Self::UnsubscribeRequested(_) => "unsubscribe_requested",
            Self::UnsubscribeFulfilled(_) => "unsubscribe_fulfilled",
            Self::MessageReceived(_) => "message_received",
            Self::SaveFirstMessageReceived(_) => "save_first_message_received",
            Self::UpdateSubscriptionInput(_) => "update_subscription_input",
        }
    }

    /// Connection the event refers to, if it carries one.
    pub fn connection_key(&self) -> Option<&ConnectionKey> {
        match self {
            Self::ConnectRequested(p) | Self::SubscriptionReady(p) => Some(&p.connection_key),
            Self::ConnectFulfilled(p)
            | Self::DisconnectRequested(p)
            | Self::DisconnectFulfilled(p) => Some(&p.connection_key),
            Self::ConnectFailed(p) => Some(&p.connection_info.key),
            Self::SubscribeRequested(p)
            | Self::SubscribeFulfilled(p)
            | Self::UnsubscribeRequested(p)
            | Self::UnsubscribeFulfilled(p) => Some(&p.connection_info.key),
            Self::SubscriptionError(p) => Some(&p.connection_info.key),
            Self::MessageReceived(_)
            | Self::SaveFirstMessageReceived(_)
            | Self::UpdateSubscriptionInput(_) => None,
        }
    }

    /// Subscription the event refers to, if it carries one.
    pub fn subscription_key(&self) -> Option<&SubscriptionKey> {
        match self {
            Self::SubscribeRequested(p)
            | Self::SubscribeFulfilled(p)
            | Self::UnsubscribeRequested(p)
            | Self::UnsubscribeFulfilled(p) => Some(&p.subscription_key),
            Self::SubscriptionError(p) => p.subscription_key.as_ref(),
            Self::MessageReceived(p) => Some(&p.subscription_key),
            Self::SaveFirstMessageReceived(p) => Some(&p.subscription_key),
            Self::UpdateSubscriptionInput(p) => Some(&p.subscription_key),
            Self::ConnectRequested(_)
            | Self::ConnectFulfilled(_)
            | Self::ConnectFailed(_)
            | Self::DisconnectRequested(_)
            | Self::DisconnectFulfilled(_)
            | Self::SubscriptionReady(_) => None,
        }
    }
}

impl fmt::Debug for ConnectPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectPayload")
            .field("connection_key", &self.connection_key)
            .field("request", &self.request)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ConnectionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPayload")
            .field("connection_key", &self.connection_key)
            .finish_non_exhaustive()
    }
}
