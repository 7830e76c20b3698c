//! Subscription multiplexer.
//!
//! Drives every subscription of a connection over its single socket. On
//! `SubscriptionReady` the request is split into single inputs and each one the
//! handler can build a subscribe message for becomes a `SubscribeRequested`.
//! Admitted intents send the subscribe message and install a route; inbound
//! frames are demultiplexed against the routes by subscription key. A frame the
//! handler flags as a provider error is not delivered; every routed
//! subscription of the connection gets a `SubscriptionError` carrying the raw
//! frame instead, since the frame need not name the subscription it concerns.
//!
//! A subscription's route lives until a matching `UnsubscribeRequested` (which
//! sends the handler's unsubscribe message and answers with
//! `UnsubscribeFulfilled`) or until its connection's `DisconnectFulfilled`.

use std::collections::BTreeMap;
use std::sync::Arc;

use feedwire_core::batch::BatchSplitter;
use feedwire_core::events::{
    ConnectPayload, MessagePayload, SubscriptionErrorPayload, SubscriptionPayload, UpdateInputPayload,
    WsEvent,
};
use feedwire_core::{ConnectionKey, SubscriptionKey};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::connection::ConnectionManager;
use crate::store::WsState;

pub(crate) struct Multiplexer {
    splitter: Arc<dyn BatchSplitter>,
    routes: BTreeMap<SubscriptionKey, SubscriptionPayload>,
}

impl Multiplexer {
    pub(crate) fn new(splitter: Arc<dyn BatchSplitter>) -> Self {
        Self {
            splitter,
            routes: BTreeMap::new(),
        }
    }

    pub(crate) fn handle(
        &mut self,
        event: &WsEvent,
        state: &WsState,
        connections: &ConnectionManager,
        out: &mut Vec<WsEvent>,
    ) {
        match event {
            WsEvent::SubscriptionReady(p) => self.fan_out(p, connections, out),
            WsEvent::SubscribeRequested(p) => self.on_subscribe(p, state, connections, out),
            WsEvent::UnsubscribeRequested(p) => self.on_unsubscribe(p, state, connections, out),
            WsEvent::UnsubscribeFulfilled(p) => {
                let _ = self.routes.remove(&p.subscription_key);
            }
            WsEvent::DisconnectFulfilled(p) => {
                self.routes
                    .retain(|_, route| route.connection_info.key != p.connection_key);
            }
            _ => {}
        }
    }

    fn fan_out(&self, p: &ConnectPayload, connections: &ConnectionManager, out: &mut Vec<WsEvent>) {
        let info = connections.connection_info(&p.connection_key);
        for input in self.splitter.split(&p.request) {
            let Some(message) = p.handler.subscribe(&input) else {
                debug!(connection_key = %p.connection_key, input_id = %input.id, "no subscribe message for input");
                continue;
            };
            out.push(WsEvent::SubscribeRequested(SubscriptionPayload::new(
                info.clone(),
                message,
                input,
                p.context.clone(),
            )));
        }
    }

    fn on_subscribe(
        &mut self,
        p: &SubscriptionPayload,
        state: &WsState,
        connections: &ConnectionManager,
        out: &mut Vec<WsEvent>,
    ) {
        let Some(sub) = state.subscription(&p.subscription_key) else {
            return;
        };

        if sub.active {
            if sub.input.fingerprint() != p.input.fingerprint() {
                debug!(subscription_key = %p.subscription_key, "updating subscription input");
                out.push(WsEvent::UpdateSubscriptionInput(UpdateInputPayload {
                    subscription_key: p.subscription_key.clone(),
                    input: p.input.clone(),
                }));
            }
            return;
        }
        if sub.subscribing > 1 {
            return;
        }

        let key = &p.connection_info.key;
        if connections.send(key, &p.subscribe_message) {
            info!(
                connection_key = %key,
                subscription_key = %p.subscription_key,
                feed_id = %p.input.feed_id(),
                "subscribing"
            );
        }
        let _ = self.routes.insert(p.subscription_key.clone(), p.clone());
    }

    fn on_unsubscribe(
        &mut self,
        p: &SubscriptionPayload,
        state: &WsState,
        connections: &ConnectionManager,
        out: &mut Vec<WsEvent>,
    ) {
        let Some(route) = self.routes.remove(&p.subscription_key) else {
            debug!(subscription_key = %p.subscription_key, "unsubscribe for unknown subscription");
            return;
        };
        let key = &route.connection_info.key;
        let stored = state.subscription(&p.subscription_key);
        let input = stored.map_or(&route.input, |s| &s.input);
        let context = stored.map_or(&route.context, |s| &s.context);
        let params = stored.and_then(|s| s.subscription_params.as_ref());

        match connections
            .handler(key)
            .and_then(|handler| handler.unsubscribe(input, params))
        {
            Some(message) => {
                let _ = connections.send(key, &message);
            }
            None => debug!(subscription_key = %p.subscription_key, "no unsubscribe message"),
        }
        info!(
            connection_key = %key,
            subscription_key = %p.subscription_key,
            feed_id = %input.feed_id(),
            "unsubscribed"
        );

        out.push(WsEvent::UnsubscribeFulfilled(SubscriptionPayload {
            connection_info: route.connection_info.clone(),
            subscription_key: route.subscription_key.clone(),
            subscribe_message: route.subscribe_message.clone(),
            input: input.clone(),
            context: context.clone(),
        }));
    }

    /// Demultiplex one inbound frame of `key` onto its subscriptions.
    pub(crate) fn route_frame(
        &self,
        key: &ConnectionKey,
        message: &Value,
        state: &WsState,
        connections: &ConnectionManager,
    ) -> Vec<WsEvent> {
        let Some(handler) = connections.handler(key) else {
            return Vec::new();
        };

        if handler.is_error(message) {
            let info = connections.connection_info(key);
            error!(connection_key = %key, url = %info.url, %message, "provider reported an error");
            return self
                .routes_of(key)
                .map(|(_, route)| {
                    WsEvent::SubscriptionError(SubscriptionErrorPayload {
                        connection_info: info.clone(),
                        reason: message.to_string(),
                        subscription_key: None,
                        subscribe_message: Some(route.subscribe_message.clone()),
                        input: Some(route.input.clone()),
                    })
                })
                .collect();
        }

        let mut events = Vec::new();
        for (sub_key, route) in self.routes_of(key) {
            let Some(sub) = state.subscription(sub_key) else {
                continue;
            };
            let owner = handler.subscription_key_from_message(message, &route.subscribe_message, &sub.input);
            if owner.as_ref() != Some(sub_key) {
                continue;
            }
            if !sub.active {
                events.push(WsEvent::SubscribeFulfilled(SubscriptionPayload {
                    input: sub.input.clone(),
                    context: sub.context.clone(),
                    ..route.clone()
                }));
            }
            events.push(WsEvent::MessageReceived(MessagePayload {
                subscription_key: sub_key.clone(),
                message: message.clone(),
            }));
        }
        events
    }

    fn routes_of<'a>(
        &'a self,
        key: &'a ConnectionKey,
    ) -> impl Iterator<Item = (&'a SubscriptionKey, &'a SubscriptionPayload)> + 'a {
        self.routes
            .iter()
            .filter(move |(_, route)| &route.connection_info.key == key)
    }

    #[cfg(test)]
    fn is_routed(&self, key: &SubscriptionKey) -> bool {
        self.routes.contains_key(key)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        ScriptedTransport, connect_payload, connection_payload, names, open_connection, settle,
        subscription_payload,
    };
    use assert_matches::assert_matches;
    use feedwire_core::AdapterRequest;
    use feedwire_core::batch::{SingleRequest, SplitArrayFields};
    use feedwire_core::events::SaveFirstMessagePayload;
    use serde_json::json;

    struct Rig {
        state: WsState,
        connections: ConnectionManager,
        mux: Multiplexer,
        transport: ScriptedTransport,
    }

    impl Rig {
        /// An open connection to `wss://a`.
        async fn open(splitter: Arc<dyn BatchSplitter>) -> Self {
            let (connections, state, transport, _rx) =
                open_connection(connect_payload("wss://a", json!({}))).await;
            Self {
                state,
                connections,
                mux: Multiplexer::new(splitter),
                transport,
            }
        }

        /// Reduce, then let the multiplexer react, depth-first.
        fn apply(&mut self, event: WsEvent) -> Vec<WsEvent> {
            let mut seen = Vec::new();
            let mut queue = vec![event];
            while let Some(event) = queue.pop() {
                self.state.reduce(&event);
                let mut out = Vec::new();
                self.mux.handle(&event, &self.state, &self.connections, &mut out);
                seen.push(event);
                queue.extend(out.into_iter().rev());
            }
            seen
        }

        fn frame(&mut self, message: Value) -> Vec<WsEvent> {
            let key = ConnectionKey::from("wss://a");
            let events = self.mux.route_frame(&key, &message, &self.state, &self.connections);
            events.into_iter().flat_map(|e| self.apply(e)).collect()
        }
    }

    fn ready(data: Value) -> WsEvent {
        WsEvent::SubscriptionReady(connect_payload("wss://a", data))
    }

    #[tokio::test(start_paused = true)]
    async fn first_frame_fulfils_then_delivers() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        settle().await;
        assert_eq!(rig.transport.sent_json(0), vec![json!({"sub": "BTC"})]);

        let events = rig.frame(json!({"sub": "BTC", "price": 100}));
        assert_eq!(names(&events), ["subscribe_fulfilled", "message_received"]);
        let events = rig.frame(json!({"sub": "BTC", "price": 101}));
        assert_eq!(names(&events), ["message_received"]);
    }

    #[tokio::test(start_paused = true)]
    async fn inputs_with_same_wire_message_share_one_subscription() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let _ = rig.apply(ready(json!({"asset": "ETH", "pair": "BTC"})));
        settle().await;
        assert_eq!(rig.transport.sent_json(0), vec![json!({"sub": "BTC"})]);
        assert_eq!(rig.state.subscriptions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_while_active_only_updates_input() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let _ = rig.frame(json!({"sub": "BTC", "price": 1}));

        let events = rig.apply(ready(json!({"asset": "BTC"})));
        assert_eq!(names(&events), ["subscription_ready", "subscribe_requested"]);

        let events = rig.apply(ready(json!({"asset": "BTC", "extra": true})));
        assert_eq!(
            names(&events),
            ["subscription_ready", "subscribe_requested", "update_subscription_input"]
        );
        settle().await;
        assert_eq!(rig.transport.sent(0).len(), 1);
        let sub = rig.state.subscriptions.values().next().unwrap();
        assert_eq!(sub.input.param("extra"), Some(&json!(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn inputs_without_subscribe_message_are_skipped() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let events = rig.apply(ready(json!({"unrelated": 1})));
        assert_eq!(names(&events), ["subscription_ready"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_request_fans_out_per_input() {
        let mut rig = Rig::open(Arc::new(SplitArrayFields::all())).await;
        let events = rig.apply(ready(json!({"asset": ["BTC", "ETH"]})));
        assert_eq!(
            names(&events),
            ["subscription_ready", "subscribe_requested", "subscribe_requested"]
        );
        settle().await;
        assert_eq!(
            rig.transport.sent_json(0),
            vec![json!({"sub": "BTC"}), json!({"sub": "ETH"})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_is_reported_per_subscription_and_not_delivered() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        assert!(rig.frame(json!({"sub": "BTC", "error": "bad"})).is_empty());

        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let _ = rig.apply(ready(json!({"asset": "ETH"})));
        let events = rig.frame(json!({"sub": "BTC", "error": "bad"}));
        assert_eq!(events.len(), 2);
        let mut reported: Vec<_> = events
            .iter()
            .map(|e| match e {
                WsEvent::SubscriptionError(e) => {
                    assert_eq!(e.reason, r#"{"error":"bad","sub":"BTC"}"#);
                    assert!(e.subscription_key.is_none());
                    e.subscribe_message.clone()
                }
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        reported.sort_by_key(|m| m.as_ref().map(ToString::to_string));
        assert_eq!(
            reported,
            [Some(json!({"sub": "BTC"})), Some(json!({"sub": "ETH"}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unmatched_frames_are_dropped() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        assert!(rig.frame(json!({"sub": "DOGE", "price": 1})).is_empty());
        assert!(rig.frame(json!("not an object")).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_sends_message_with_saved_params() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let _ = rig.frame(json!({"sub": "BTC", "price": 1}));
        let p = subscription_payload("wss://a", json!({"asset": "BTC"}));
        let _ = rig.apply(WsEvent::SaveFirstMessageReceived(
            SaveFirstMessagePayload {
                subscription_key: p.subscription_key.clone(),
                params: json!({"channelId": 9}),
            },
        ));

        let events = rig.apply(WsEvent::UnsubscribeRequested(p.clone()));
        assert_eq!(names(&events), ["unsubscribe_requested", "unsubscribe_fulfilled"]);
        assert!(rig.state.subscription(&p.subscription_key).is_none());
        assert!(!rig.mux.is_routed(&p.subscription_key));
        settle().await;
        assert_eq!(
            rig.transport.sent_json(0).last(),
            Some(&json!({"unsub": "BTC", "params": {"channelId": 9}}))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_of_unknown_key_is_ignored() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let p = subscription_payload("wss://a", json!({"asset": "BTC"}));
        let events = rig.apply(WsEvent::UnsubscribeRequested(p));
        assert_eq!(names(&events), ["unsubscribe_requested"]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_drops_routes_of_that_connection() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let p = subscription_payload("wss://a", json!({"asset": "BTC"}));
        assert!(rig.mux.is_routed(&p.subscription_key));
        let _ = rig.apply(WsEvent::DisconnectFulfilled(connection_payload("wss://a")));
        assert!(!rig.mux.is_routed(&p.subscription_key));
    }

    #[tokio::test(start_paused = true)]
    async fn fulfilled_event_carries_stored_input() {
        let mut rig = Rig::open(Arc::new(SingleRequest)).await;
        let _ = rig.apply(ready(json!({"asset": "BTC"})));
        let input = AdapterRequest::new("1", json!({"asset": "BTC"}));
        let events = rig.frame(json!({"sub": "BTC", "price": 5}));
        assert_matches!(&events[0], WsEvent::SubscribeFulfilled(s) if s.input == input);
    }
}
