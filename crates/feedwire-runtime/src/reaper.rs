//! Idle-timeout reaper.
//!
//! Every subscribe intent (re)starts a `subscription_ttl` timer for its key. A
//! subscription nobody asks for again within that window gets an
//! `UnsubscribeRequested`.

use std::time::Duration;

use feedwire_core::SubscriptionKey;
use feedwire_core::events::{SubscriptionPayload, WsEvent};
use tracing::debug;

use crate::command::{CommandSender, TimerKind};
use crate::timers::TimerSet;

pub(crate) struct IdleReaper {
    ttl: Duration,
    timers: TimerSet<SubscriptionPayload>,
}

impl IdleReaper {
    pub(crate) fn new(ttl: Duration, commands: CommandSender) -> Self {
        Self {
            ttl,
            timers: TimerSet::new(TimerKind::Idle, commands),
        }
    }

    pub(crate) fn handle(&mut self, event: &WsEvent) {
        match event {
            WsEvent::SubscribeRequested(p) => self.timers.arm(
                p.subscription_key.clone(),
                p.connection_info.key.clone(),
                self.ttl,
                p.clone(),
            ),
            WsEvent::UnsubscribeFulfilled(p) => self.timers.cancel(&p.subscription_key),
            WsEvent::DisconnectFulfilled(p) => self.timers.cancel_connection(&p.connection_key),
            _ => {}
        }
    }

    pub(crate) fn elapsed(&mut self, key: &SubscriptionKey, generation: u64) -> Option<WsEvent> {
        let (_, payload) = self.timers.take_elapsed(key, generation)?;
        debug!(
            subscription_key = %key,
            subscribe_message = %payload.subscribe_message,
            "unsubscribing inactive feed"
        );
        Some(WsEvent::UnsubscribeRequested(payload))
    }

    pub(crate) fn cancel_all(&mut self) {
        self.timers.cancel_all();
    }
}
