//! Provider capability set.
//!
//! Every upstream data provider implements [`WsHandler`]. The orchestrator never
//! inspects provider messages itself; it only asks the handler to build, classify
//! and translate them.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::HandlerError;
use crate::ids::SubscriptionKey;
use crate::request::{AdapterRequest, AdapterResponse};

/// Where and how to open the provider socket.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    /// Static socket URL. Replaced by [`WsHandler::resolve_url`] when that returns a value.
    pub url: String,
    /// Optional `Sec-WebSocket-Protocol` value.
    pub protocol: Option<String>,
}

impl ConnectionDescriptor {
    /// Descriptor for a plain URL with no subprotocol.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            protocol: None,
        }
    }

    /// Set the subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }
}

/// Per-provider message codec and connection description.
///
/// Only [`connection`](WsHandler::connection), [`subscribe`](WsHandler::subscribe),
/// [`unsubscribe`](WsHandler::unsubscribe),
/// [`subscription_from_message`](WsHandler::subscription_from_message) and
/// [`to_response`](WsHandler::to_response) are mandatory.
#[async_trait]
pub trait WsHandler: Send + Sync + 'static {
    /// Static connection descriptor.
    fn connection(&self) -> ConnectionDescriptor;

    /// Resolve a dynamic connection URL for `request` (for example, a signed URL).
    ///
    /// `Ok(None)` keeps the static URL.
    async fn resolve_url(&self, _request: &AdapterRequest) -> Result<Option<String>, HandlerError> {
        Ok(None)
    }

    /// Wire subscribe message for one input, or `None` if the input cannot be subscribed.
    fn subscribe(&self, input: &AdapterRequest) -> Option<Value>;

    /// Wire unsubscribe message, using params captured from the first message if any.
    fn unsubscribe(&self, input: &AdapterRequest, params: Option<&Value>) -> Option<Value>;

    /// Whether an inbound message is a provider-reported error.
    fn is_error(&self, _message: &Value) -> bool {
        false
    }

    /// Reconstruct the subscribe message an inbound message belongs to.
    ///
    /// `subscribe_message` and `input` are those of the subscription being tested.
    fn subscription_from_message(
        &self,
        message: &Value,
        subscribe_message: &Value,
        input: &AdapterRequest,
    ) -> Option<Value>;

    /// Subscription identity of an inbound message.
    ///
    /// Defaults to the digest of [`subscription_from_message`](WsHandler::subscription_from_message).
    fn subscription_key_from_message(
        &self,
        message: &Value,
        subscribe_message: &Value,
        input: &AdapterRequest,
    ) -> Option<SubscriptionKey> {
        self.subscription_from_message(message, subscribe_message, input)
            .map(|msg| SubscriptionKey::from_message(&msg))
    }

    /// Translate a pushed message into the response a poll would have produced.
    async fn to_response(&self, message: &Value, input: &AdapterRequest) -> Option<AdapterResponse>;

    /// Whether a message should be observed by the cache bridge at all.
    fn filter(&self, _message: &Value) -> bool {
        true
    }

    /// Handshake message sent as the first frame after the socket opens.
    fn on_connect(&self, _request: &AdapterRequest) -> Option<Value> {
        None
    }

    /// Session params to capture from the first message of a subscription.
    ///
    /// Handlers returning `Some` get those params passed back to
    /// [`unsubscribe`](WsHandler::unsubscribe).
    fn save_from_first_message(&self, _message: &Value) -> Option<Value> {
        None
    }
}
