//! Cache bridge.
//!
//! Writes every delivered message that passes the handler's filter into the
//! cache under the key a poll of the subscription's stored input would use.
//! Each subscription has a worker task of its own, so the event stream never
//! waits on the cache. A worker holds at most one pending write: a value that
//! arrives while the previous write is still running replaces the one waiting
//! behind it, and only the newest reaches the cache. Failures are logged and
//! dropped.
//!
//! Also captures first-message session params for handlers that declare them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use feedwire_core::cache::{Cache, CacheEntry, CacheKey};
use feedwire_core::events::{SaveFirstMessagePayload, WsEvent};
use feedwire_core::{AdapterContext, AdapterRequest, ConnectionKey, SubscriptionKey, WsHandler};
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::connection::ConnectionManager;
use crate::metrics::WS_CACHE_WRITES_SUPERSEDED;
use crate::store::WsState;

struct CacheJob {
    handler: Arc<dyn WsHandler>,
    message: Value,
    input: AdapterRequest,
    context: AdapterContext,
}

/// Newest write not yet picked up by the worker.
#[derive(Default)]
struct LatestSlot {
    job: Mutex<Option<CacheJob>>,
    ready: Notify,
}

struct Worker {
    connection_key: ConnectionKey,
    slot: Arc<LatestSlot>,
    cancel: CancellationToken,
}

impl Worker {
    fn spawn(connection_key: ConnectionKey, cache: Arc<dyn Cache>, default_ttl: Duration) -> Self {
        let slot = Arc::new(LatestSlot::default());
        let cancel = CancellationToken::new();
        let _ = tokio::spawn(run_worker(
            cache,
            default_ttl,
            Arc::clone(&slot),
            cancel.clone(),
        ));
        Self {
            connection_key,
            slot,
            cancel,
        }
    }

    /// Queue `job`, replacing a write that has not started yet.
    fn push(&self, subscription_key: &SubscriptionKey, job: CacheJob) {
        let superseded = self.slot.job.lock().replace(job).is_some();
        self.slot.ready.notify_one();
        if superseded {
            debug!(subscription_key = %subscription_key, "cache write superseded by a newer value");
            counter!(WS_CACHE_WRITES_SUPERSEDED, "subscription_key" => subscription_key.to_string())
                .increment(1);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) struct CacheBridge {
    cache: Arc<dyn Cache>,
    default_ttl: Duration,
    workers: HashMap<SubscriptionKey, Worker>,
}

impl CacheBridge {
    pub(crate) fn new(cache: Arc<dyn Cache>, default_ttl: Duration) -> Self {
        Self {
            cache,
            default_ttl,
            workers: HashMap::new(),
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
            WsEvent::MessageReceived(p) => {
                let Some(sub) = state.subscription(&p.subscription_key) else {
                    warn!(subscription_key = %p.subscription_key, "could not find subscription for incoming message");
                    return;
                };
                let Some(handler) = connections.handler(&sub.connection_key) else {
                    return;
                };
                if !handler.filter(&p.message) {
                    return;
                }

                if sub.subscription_params.is_none() {
                    if let Some(params) = handler.save_from_first_message(&p.message) {
                        out.push(WsEvent::SaveFirstMessageReceived(SaveFirstMessagePayload {
                            subscription_key: p.subscription_key.clone(),
                            params,
                        }));
                    }
                }

                let job = CacheJob {
                    handler,
                    message: p.message.clone(),
                    input: sub.input.clone(),
                    context: sub.context.clone(),
                };
                self.workers
                    .entry(p.subscription_key.clone())
                    .or_insert_with(|| {
                        Worker::spawn(
                            sub.connection_key.clone(),
                            Arc::clone(&self.cache),
                            self.default_ttl,
                        )
                    })
                    .push(&p.subscription_key, job);
            }
            WsEvent::UnsubscribeFulfilled(p) => {
                let _ = self.workers.remove(&p.subscription_key);
            }
            WsEvent::DisconnectFulfilled(p) => {
                self.workers
                    .retain(|_, worker| worker.connection_key != p.connection_key);
            }
            _ => {}
        }
    }

    /// Stop accepting writes. Pending writes still complete.
    pub(crate) fn close(&mut self) {
        self.workers.clear();
    }
}

async fn run_worker(
    cache: Arc<dyn Cache>,
    default_ttl: Duration,
    slot: Arc<LatestSlot>,
    cancel: CancellationToken,
) {
    loop {
        let stop = tokio::select! {
            biased;
            () = slot.ready.notified() => false,
            () = cancel.cancelled() => true,
        };
        let job = slot.job.lock().take();
        if let Some(job) = job {
            write_through(cache.as_ref(), job, default_ttl).await;
        }
        if stop {
            break;
        }
    }
}

async fn write_through(cache: &dyn Cache, job: CacheJob, default_ttl: Duration) {
    let Some(response) = job.handler.to_response(&job.message, &job.input).await else {
        return;
    };
    let request = job.input.as_push_write();
    let key = CacheKey::for_request(&request);
    let ttl = job
        .context
        .cache_max_age_ms
        .map_or(default_ttl, Duration::from_millis);
    let result = response.result.to_string();

    match cache.set(key.clone(), CacheEntry::new(response, &request), ttl).await {
        Ok(()) => trace!(cache_key = %key, feed_id = %request.feed_id(), %result, "saved pushed result"),
        Err(e) => error!(cache_key = %key, error = %e, "cache write failed"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
