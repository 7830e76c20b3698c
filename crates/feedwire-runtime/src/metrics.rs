//! Metrics recorded from the event stream.
//!
//! Emitted through the `metrics` facade so the host decides how they are
//! exported. Observation happens before the event is reduced, so teardown
//! events still see the state they are tearing down.

use feedwire_core::events::{SubscriptionPayload, WsEvent};
use metrics::{Label, counter, gauge};

use crate::store::WsState;

// Metric name constants to avoid typos across crates.

/// Open connections (gauge, labels: `connection_key`).
pub const WS_CONNECTION_ACTIVE: &str = "ws_connection_active";
/// Connection failures (counter, labels: `connection_key`, message).
pub const WS_CONNECTION_ERRORS: &str = "ws_connection_errors";
/// Subscriptions that became active (counter, labels: `connection_key`, `feed_id`, `subscription_key`).
pub const WS_SUBSCRIPTION_TOTAL: &str = "ws_subscription_total";
/// Active subscriptions (gauge, labels: `connection_key`, `feed_id`, `subscription_key`).
pub const WS_SUBSCRIPTION_ACTIVE: &str = "ws_subscription_active";
/// Subscription errors (counter, labels: `connection_key`, `feed_id`, message, `subscription_key`).
pub const WS_SUBSCRIPTION_ERRORS: &str = "ws_subscription_errors";
/// Messages delivered to subscriptions (counter, labels: `feed_id`, `subscription_key`).
pub const WS_MESSAGE_TOTAL: &str = "ws_message_total";
/// Pushed values replaced before the cache write for them started (counter, labels: `subscription_key`).
pub const WS_CACHE_WRITES_SUPERSEDED: &str = "ws_cache_writes_superseded";

const NOT_AVAILABLE: &str = "N/A";

fn subscription_labels(p: &SubscriptionPayload) -> Vec<Label> {
    vec![
        Label::new("connection_key", p.connection_info.key.to_string()),
        Label::new("feed_id", p.input.feed_id()),
        Label::new("subscription_key", p.subscription_key.to_string()),
    ]
}

/// Record `event` against the state it is about to be reduced into.
pub(crate) fn observe(event: &WsEvent, state: &WsState) {
    match event {
        WsEvent::ConnectFulfilled(p) => {
            gauge!(WS_CONNECTION_ACTIVE, "connection_key" => p.connection_key.to_string()).increment(1.0);
        }
        WsEvent::ConnectFailed(p) => {
            counter!(
                WS_CONNECTION_ERRORS,
                "connection_key" => p.connection_info.key.to_string(),
                "message" => p.reason.clone()
            )
            .increment(1);
        }
        WsEvent::DisconnectFulfilled(p) => {
            if state
                .connection(&p.connection_key)
                .is_some_and(|c| c.was_ever_connected)
            {
                gauge!(WS_CONNECTION_ACTIVE, "connection_key" => p.connection_key.to_string()).decrement(1.0);
            }
        }
        WsEvent::SubscribeFulfilled(p) => {
            counter!(WS_SUBSCRIPTION_TOTAL, subscription_labels(p)).increment(1);
            gauge!(WS_SUBSCRIPTION_ACTIVE, subscription_labels(p)).increment(1.0);
        }
        WsEvent::UnsubscribeFulfilled(p) => {
            if state
                .subscription(&p.subscription_key)
                .is_some_and(|s| s.was_ever_active)
            {
                gauge!(WS_SUBSCRIPTION_ACTIVE, subscription_labels(p)).decrement(1.0);
            }
        }
        WsEvent::SubscriptionError(p) => {
            let labels = vec![
                Label::new("connection_key", p.connection_info.key.to_string()),
                Label::new(
                    "feed_id",
                    p.input.as_ref().map_or_else(|| NOT_AVAILABLE.to_owned(), |i| i.feed_id()),
                ),
                Label::new("message", p.reason.clone()),
                Label::new(
                    "subscription_key",
                    p.subscription_key
                        .as_ref()
                        .map_or_else(|| NOT_AVAILABLE.to_owned(), ToString::to_string),
                ),
            ];
            counter!(WS_SUBSCRIPTION_ERRORS, labels).increment(1);
        }
        WsEvent::MessageReceived(p) => {
            let feed_id = state
                .subscription(&p.subscription_key)
                .map_or_else(|| NOT_AVAILABLE.to_owned(), |s| s.input.feed_id());
            counter!(
                WS_MESSAGE_TOTAL,
                "feed_id" => feed_id,
                "subscription_key" => p.subscription_key.to_string()
            )
            .increment(1);
        }
        _ => {}
    }
}
