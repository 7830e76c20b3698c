//! Cache collaborator shared by the poll and push paths.
//!
//! Both paths key entries with [`CacheKey::for_request`], so a pushed value
//! overwrites (and is read as) the value a poll with the same input would store.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::errors::CacheError;
use crate::request::{AdapterRequest, AdapterResponse};

/// Prefix of every request-derived cache key.
pub const CACHE_KEY_PREFIX: &str = "feedwire:";

/// Key of one cached adapter response.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key a poll-style request with the same endpoint and data would use.
    pub fn for_request(request: &AdapterRequest) -> Self {
        Self(format!("{CACHE_KEY_PREFIX}{}", request.fingerprint()))
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cached response plus provenance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// The cached response.
    pub response: AdapterResponse,
    /// Whether the value arrived over a push channel.
    pub ws: bool,
    /// Feed identity of the request that produced the value.
    pub feed_id: String,
    /// Wall-clock write time.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry for `response`, with provenance taken from `request`.
    pub fn new(response: AdapterResponse, request: &AdapterRequest) -> Self {
        Self {
            response,
            ws: request.debug.as_ref().is_some_and(|debug| debug.ws),
            feed_id: request.feed_id(),
            stored_at: Utc::now(),
        }
    }
}

/// Generic request/response cache.
#[async_trait]
pub trait Cache: Send + Sync + 'static {
    /// Fetch a live entry.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry for `ttl`.
    async fn set(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;
}

struct Slot {
    entry: CacheEntry,
    inserted_at: Instant,
    expires_at: Instant,
}

/// In-process [`Cache`] with per-entry expiry and a size bound.
///
/// When full, the oldest inserted entry is evicted.
pub struct LocalCache {
    slots: DashMap<CacheKey, Slot>,
    max_items: usize,
}

impl LocalCache {
    /// Cache holding at most `max_items` entries (minimum 1).
    pub fn new(max_items: usize) -> Self {
        Self {
            slots: DashMap::new(),
            max_items: max_items.max(1),
        }
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn evict_oldest(&self) {
        let oldest = self
            .slots
            .iter()
            .min_by_key(|slot| slot.value().inserted_at)
            .map(|slot| slot.key().clone());
        if let Some(key) = oldest {
            let _ = self.slots.remove(&key);
        }
    }
}

#[async_trait]
impl Cache for LocalCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let now = Instant::now();
        match self.slots.get(key) {
            None => return Ok(None),
            Some(slot) if slot.expires_at > now => return Ok(Some(slot.entry.clone())),
            Some(_) => {}
        }
        let _ = self.slots.remove_if(key, |_, slot| slot.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        if !self.slots.contains_key(&key) && self.slots.len() >= self.max_items {
            self.evict_oldest();
        }
        let now = Instant::now();
        let _ = self.slots.insert(
            key,
            Slot {
                entry,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}
