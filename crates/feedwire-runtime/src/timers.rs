//! Cancellable per-subscription timers.
//!
//! Arming a key cancels the timer already running for it, so "next qualifying
//! event" and "timer elapsed" race and only the first one counts. An elapsed
//! report is honoured only if its generation is still the armed one.

use std::collections::HashMap;
use std::time::Duration;

use feedwire_core::{ConnectionKey, SubscriptionKey};
use tokio_util::sync::CancellationToken;

use crate::command::{Command, CommandSender, TimerKind};

struct TimerEntry<T> {
    generation: u64,
    connection_key: ConnectionKey,
    cancel: CancellationToken,
    data: T,
}

/// One timer per subscription key, each carrying `T` back when it fires.
pub(crate) struct TimerSet<T> {
    kind: TimerKind,
    commands: CommandSender,
    entries: HashMap<SubscriptionKey, TimerEntry<T>>,
    next_generation: u64,
}

impl<T> TimerSet<T> {
    pub(crate) fn new(kind: TimerKind, commands: CommandSender) -> Self {
        Self {
            kind,
            commands,
            entries: HashMap::new(),
            next_generation: 0,
        }
    }

    /// (Re)start the timer for `key`.
    pub(crate) fn arm(
        &mut self,
        key: SubscriptionKey,
        connection_key: ConnectionKey,
        after: Duration,
        data: T,
    ) {
        if let Some(previous) = self.entries.remove(&key) {
            previous.cancel.cancel();
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let commands = self.commands.clone();
        let kind = self.kind;
        let timer_key = key.clone();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    let _ = commands.send(Command::TimerElapsed { kind, key: timer_key, generation });
                }
            }
        });

        let _ = self.entries.insert(
            key,
            TimerEntry {
                generation,
                connection_key,
                cancel,
                data,
            },
        );
    }

    /// Claim an elapsed timer. `None` if it was re-armed or cancelled since.
    pub(crate) fn take_elapsed(
        &mut self,
        key: &SubscriptionKey,
        generation: u64,
    ) -> Option<(ConnectionKey, T)> {
        if self.entries.get(key)?.generation != generation {
            return None;
        }
        self.entries
            .remove(key)
            .map(|entry| (entry.connection_key, entry.data))
    }

    pub(crate) fn cancel(&mut self, key: &SubscriptionKey) {
        if let Some(entry) = self.entries.remove(key) {
            entry.cancel.cancel();
        }
    }

    /// Cancel every timer for subscriptions of `connection_key`.
    pub(crate) fn cancel_connection(&mut self, connection_key: &ConnectionKey) {
        self.entries.retain(|_, entry| {
            let keep = &entry.connection_key != connection_key;
            if !keep {
                entry.cancel.cancel();
            }
            keep
        });
    }

    pub(crate) fn cancel_all(&mut self) {
        for (_, entry) in self.entries.drain() {
            entry.cancel.cancel();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, key: &SubscriptionKey) -> bool {
        self.entries.contains_key(key)
    }
}

impl<T> Drop for TimerSet<T> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
