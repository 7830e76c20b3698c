//! Connection and subscription state, and the reducer that is its only mutator.
//!
//! Every component reads [`WsState`] to make admission decisions; none writes it.
//! The orchestrator applies each event with [`WsState::reduce`] before handing it
//! to the components.

use std::collections::BTreeMap;

use feedwire_core::events::WsEvent;
use feedwire_core::{AdapterContext, AdapterRequest, ConnectionKey, SubscriptionKey};
use serde_json::Value;

/// State of one connection key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// The socket reported open.
    pub active: bool,
    /// Connect intents seen since the last open, failure or teardown.
    pub connecting: u32,
    /// The socket opened at least once in this lifecycle.
    pub was_ever_connected: bool,
}

/// State of one subscription key.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionState {
    /// Owning connection.
    pub connection_key: ConnectionKey,
    /// The first message arrived.
    pub active: bool,
    /// Subscribe intents seen since the last fulfilment, error or teardown.
    pub subscribing: u32,
    /// Wire subscribe message.
    pub subscribe_message: Value,
    /// Last input that produced this subscription.
    pub input: AdapterRequest,
    /// Caller metadata for `input`.
    pub context: AdapterContext,
    /// Params captured from the first message.
    pub subscription_params: Option<Value>,
    /// The subscription became active at least once in this lifecycle.
    pub was_ever_active: bool,
}

/// Snapshot of every connection and subscription.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WsState {
    /// Connections by key.
    pub connections: BTreeMap<ConnectionKey, ConnectionState>,
    /// Subscriptions by key.
    pub subscriptions: BTreeMap<SubscriptionKey, SubscriptionState>,
}

impl WsState {
    /// State of a connection, if known.
    pub fn connection(&self, key: &ConnectionKey) -> Option<&ConnectionState> {
        self.connections.get(key)
    }

    /// State of a subscription, if known.
    pub fn subscription(&self, key: &SubscriptionKey) -> Option<&SubscriptionState> {
        self.subscriptions.get(key)
    }

    /// Whether the connection reported open.
    pub fn is_connection_active(&self, key: &ConnectionKey) -> bool {
        self.connection(key).is_some_and(|c| c.active)
    }

    /// Whether the subscription received its first message.
    pub fn is_subscription_active(&self, key: &SubscriptionKey) -> bool {
        self.subscription(key).is_some_and(|s| s.active)
    }

    /// Active subscriptions owned by a connection, in key order.
    pub fn active_subscriptions_of<'a>(
        &'a self,
        connection_key: &'a ConnectionKey,
    ) -> impl Iterator<Item = (&'a SubscriptionKey, &'a SubscriptionState)> + 'a {
        self.subscriptions
            .iter()
            .filter(move |(_, sub)| sub.active && &sub.connection_key == connection_key)
    }

    /// Apply one event.
    pub fn reduce(&mut self, event: &WsEvent) {
        match event {
            WsEvent::ConnectRequested(p) => {
                let conn = self.connections.entry(p.connection_key.clone()).or_default();
                if !conn.active {
                    conn.connecting += 1;
                }
            }
            WsEvent::ConnectFulfilled(p) => {
                let conn = self.connections.entry(p.connection_key.clone()).or_default();
                conn.active = true;
                conn.connecting = 0;
                conn.was_ever_connected = true;
            }
            WsEvent::ConnectFailed(p) => {
                if let Some(conn) = self.connections.get_mut(&p.connection_info.key) {
                    conn.active = false;
                    conn.connecting = 0;
                }
            }
            WsEvent::DisconnectFulfilled(p) => {
                let _ = self.connections.remove(&p.connection_key);
                self.subscriptions
                    .retain(|_, sub| sub.connection_key != p.connection_key);
            }
            WsEvent::SubscribeRequested(p) => {
                let sub = self
                    .subscriptions
                    .entry(p.subscription_key.clone())
                    .or_insert_with(|| SubscriptionState {
                        connection_key: p.connection_info.key.clone(),
                        active: false,
                        subscribing: 0,
                        subscribe_message: p.subscribe_message.clone(),
                        input: p.input.clone(),
                        context: p.context.clone(),
                        subscription_params: None,
                        was_ever_active: false,
                    });
                if !sub.active {
                    if sub.subscribing == 0 {
                        sub.connection_key = p.connection_info.key.clone();
                        sub.subscribe_message = p.subscribe_message.clone();
                        sub.input = p.input.clone();
                        sub.context = p.context.clone();
                    }
                    sub.subscribing += 1;
                }
            }
            WsEvent::SubscribeFulfilled(p) => {
                if let Some(sub) = self.subscriptions.get_mut(&p.subscription_key) {
                    sub.active = true;
                    sub.subscribing = 0;
                    sub.was_ever_active = true;
                }
            }
            WsEvent::SubscriptionError(p) => {
                let Some(key) = &p.subscription_key else {
                    return;
                };
                if let Some(sub) = self.subscriptions.get_mut(key) {
                    if !sub.active {
                        sub.subscribing = 0;
                    }
                }
            }
            WsEvent::UnsubscribeFulfilled(p) => {
                let _ = self.subscriptions.remove(&p.subscription_key);
            }
            WsEvent::SaveFirstMessageReceived(p) => {
                if let Some(sub) = self.subscriptions.get_mut(&p.subscription_key) {
                    sub.subscription_params = Some(p.params.clone());
                }
            }
            WsEvent::UpdateSubscriptionInput(p) => {
                if let Some(sub) = self.subscriptions.get_mut(&p.subscription_key) {
                    sub.input = p.input.clone();
                }
            }
            WsEvent::DisconnectRequested(_)
            | WsEvent::SubscriptionReady(_)
            | WsEvent::UnsubscribeRequested(_)
            | WsEvent::MessageReceived(_) => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
