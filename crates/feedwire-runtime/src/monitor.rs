//! Unresponsive-channel monitor.
//!
//! Every delivered message (re)starts a `subscription_unresponsive_ttl` timer
//! for its subscription. When one fires while the subscription is still active
//! or subscribing, the monitor forces a resubscribe cycle on the same
//! connection: `SubscriptionError`, `UnsubscribeRequested`, `SubscribeRequested`.

use std::time::Duration;

use feedwire_core::SubscriptionKey;
use feedwire_core::events::{SubscriptionErrorPayload, SubscriptionPayload, WsEvent};
use tracing::error;

use crate::command::{CommandSender, TimerKind};
use crate::connection::ConnectionManager;
use crate::store::WsState;
use crate::timers::TimerSet;

/// Reason carried by the error event of a forced resubscribe.
pub const UNRESPONSIVE_REASON: &str = "unresponsive channel: unsubscribe -> subscribe";

pub(crate) struct UnresponsiveMonitor {
    ttl: Duration,
    timers: TimerSet<()>,
}

impl UnresponsiveMonitor {
    pub(crate) fn new(ttl: Duration, commands: CommandSender) -> Self {
        Self {
            ttl,
            timers: TimerSet::new(TimerKind::Unresponsive, commands),
        }
    }

    pub(crate) fn handle(&mut self, event: &WsEvent, state: &WsState) {
        match event {
            WsEvent::MessageReceived(p) => {
                if let Some(sub) = state.subscription(&p.subscription_key) {
                    self.timers.arm(
                        p.subscription_key.clone(),
                        sub.connection_key.clone(),
                        self.ttl,
                        (),
                    );
                }
            }
            WsEvent::UnsubscribeFulfilled(p) => self.timers.cancel(&p.subscription_key),
            WsEvent::DisconnectFulfilled(p) => self.timers.cancel_connection(&p.connection_key),
            _ => {}
        }
    }

    pub(crate) fn elapsed(
        &mut self,
        key: &SubscriptionKey,
        generation: u64,
        state: &WsState,
        connections: &ConnectionManager,
    ) -> Vec<WsEvent> {
        let Some((connection_key, ())) = self.timers.take_elapsed(key, generation) else {
            return Vec::new();
        };
        let Some(sub) = state
            .subscription(key)
            .filter(|sub| sub.active || sub.subscribing > 0)
        else {
            return Vec::new();
        };

        let feed_id = sub.input.feed_id();
        error!(
            subscription_key = %key,
            %feed_id,
            ttl_ms = self.ttl.as_millis() as u64,
            "resubscribing unresponsive subscription"
        );

        let info = connections.connection_info(&connection_key);
        let stored = SubscriptionPayload {
            connection_info: info.clone(),
            subscription_key: key.clone(),
            subscribe_message: sub.subscribe_message.clone(),
            input: sub.input.clone(),
            context: sub.context.clone(),
        };
        let resubscribe = connections
            .handler(&connection_key)
            .and_then(|handler| handler.subscribe(&sub.input))
            .map_or_else(
                || stored.clone(),
                |message| SubscriptionPayload::new(info.clone(), message, sub.input.clone(), sub.context.clone()),
            );

        vec![
            WsEvent::SubscriptionError(SubscriptionErrorPayload {
                connection_info: info,
                reason: UNRESPONSIVE_REASON.to_owned(),
                subscription_key: Some(key.clone()),
                subscribe_message: Some(sub.subscribe_message.clone()),
                input: Some(sub.input.clone()),
            }),
            WsEvent::UnsubscribeRequested(stored),
            WsEvent::SubscribeRequested(resubscribe),
        ]
    }

    pub(crate) fn cancel_all(&mut self) {
        self.timers.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::testutil::{ScriptedTransport, connection_payload, names, subscription_payload};
    use feedwire_core::events::MessagePayload;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    const TTL: Duration = Duration::from_secs(60);

    struct Rig {
        monitor: UnresponsiveMonitor,
        connections: ConnectionManager,
        state: WsState,
        rx: mpsc::UnboundedReceiver<Command>,
        sub: SubscriptionPayload,
    }

    fn rig() -> Rig {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = WsState::default();
        let sub = subscription_payload("wss://a", json!({"asset": "BTC"}));
        state.reduce(&WsEvent::SubscribeRequested(sub.clone()));
        state.reduce(&WsEvent::SubscribeFulfilled(sub.clone()));
        Rig {
            monitor: UnresponsiveMonitor::new(TTL, tx.clone()),
            connections: ConnectionManager::new(Arc::new(ScriptedTransport::default()), tx),
            state,
            rx,
            sub,
        }
    }

    fn message(sub: &SubscriptionPayload) -> WsEvent {
        WsEvent::MessageReceived(MessagePayload {
            subscription_key: sub.subscription_key.clone(),
            message: json!({"sub": "BTC", "price": 1}),
        })
    }

    fn fired(rx: &mut mpsc::UnboundedReceiver<Command>) -> (SubscriptionKey, u64) {
        let Ok(Command::TimerElapsed { kind: TimerKind::Unresponsive, key, generation }) = rx.try_recv() else {
            panic!("expected unresponsive timer");
        };
        (key, generation)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_subscription_is_cycled_in_order() {
        let mut rig = rig();
        rig.monitor.handle(&message(&rig.sub), &rig.state);
        tokio::time::sleep(TTL + Duration::from_millis(1)).await;

        let (key, generation) = fired(&mut rig.rx);
        let events = rig.monitor.elapsed(&key, generation, &rig.state, &rig.connections);
        assert_eq!(
            names(&events),
            ["subscription_error", "unsubscribe_requested", "subscribe_requested"]
        );
        let WsEvent::SubscribeRequested(again) = &events[2] else {
            unreachable!()
        };
        assert_eq!(again.input, rig.sub.input);
        assert_eq!(again.subscription_key, rig.sub.subscription_key);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_keep_the_channel_alive() {
        let mut rig = rig();
        for _ in 0..5 {
            rig.monitor.handle(&message(&rig.sub), &rig.state);
            tokio::time::sleep(TTL / 2).await;
        }
        assert!(rig.rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn torn_down_subscription_is_not_cycled() {
        let mut rig = rig();
        rig.monitor.handle(&message(&rig.sub), &rig.state);
        tokio::time::sleep(TTL + Duration::from_millis(1)).await;
        let (key, generation) = fired(&mut rig.rx);

        rig.state.reduce(&WsEvent::UnsubscribeFulfilled(rig.sub.clone()));
        assert!(rig.monitor.elapsed(&key, generation, &rig.state, &rig.connections).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_timers() {
        let mut rig = rig();
        rig.monitor.handle(&message(&rig.sub), &rig.state);
        rig.monitor
            .handle(&WsEvent::DisconnectFulfilled(connection_payload("wss://a")), &rig.state);
        tokio::time::sleep(TTL * 2).await;
        assert!(rig.rx.try_recv().is_err());
    }
}
