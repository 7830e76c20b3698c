//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a partial JSON
//! file fills the missing fields from compiled defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound for every TTL, in milliseconds.
const MIN_TTL_MS: u64 = 1;

/// Lower bound for the event tap capacity.
const MIN_EVENT_CAPACITY: usize = 16;

/// Root settings type.
///
/// ```json
/// {
///   "ws": { "subscriptionTtlMs": 60000 },
///   "cache": { "maxItems": 5000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedwireSettings {
    /// Subscription orchestrator settings.
    pub ws: WsSettings,
    /// Cache settings.
    pub cache: CacheSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl FeedwireSettings {
    /// Clamp out-of-range values, warning about each adjustment.
    pub fn validate(&mut self) {
        fn clamp_min_u64(val: &mut u64, min: u64, name: &str) {
            if *val < min {
                tracing::warn!("{name} out of range ({val}), clamped to {min}");
                *val = min;
            }
        }

        clamp_min_u64(&mut self.ws.subscription_ttl_ms, MIN_TTL_MS, "subscription_ttl_ms");
        clamp_min_u64(
            &mut self.ws.subscription_unresponsive_ttl_ms,
            MIN_TTL_MS,
            "subscription_unresponsive_ttl_ms",
        );
        clamp_min_u64(&mut self.cache.max_age_ms, MIN_TTL_MS, "cache.max_age_ms");

        if self.ws.event_capacity < MIN_EVENT_CAPACITY {
            tracing::warn!(
                "event_capacity out of range ({}), clamped to {MIN_EVENT_CAPACITY}",
                self.ws.event_capacity
            );
            self.ws.event_capacity = MIN_EVENT_CAPACITY;
        }
        if self.cache.max_items == 0 {
            tracing::warn!("cache.max_items out of range (0), clamped to 1");
            self.cache.max_items = 1;
        }
    }
}

/// Subscription orchestrator timing and buffering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WsSettings {
    /// Idle time after the last subscribe intent before a subscription is dropped.
    pub subscription_ttl_ms: u64,
    /// Silence on an active subscription before a forced resubscribe.
    pub subscription_unresponsive_ttl_ms: u64,
    /// Capacity of the broadcast event tap.
    pub event_capacity: usize,
}

impl Default for WsSettings {
    fn default() -> Self {
        Self {
            subscription_ttl_ms: 120_000,
            subscription_unresponsive_ttl_ms: 120_000,
            event_capacity: 1024,
        }
    }
}

impl WsSettings {
    /// Idle-timeout as a [`Duration`].
    pub fn subscription_ttl(&self) -> Duration {
        Duration::from_millis(self.subscription_ttl_ms)
    }

    /// Unresponsive-channel timeout as a [`Duration`].
    pub fn subscription_unresponsive_ttl(&self) -> Duration {
        Duration::from_millis(self.subscription_unresponsive_ttl_ms)
    }
}

/// Cache write defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    /// TTL of pushed cache entries unless the request context overrides it.
    pub max_age_ms: u64,
    /// Entry bound of the in-memory cache.
    pub max_items: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_age_ms: 90_000,
            max_items: 1000,
        }
    }
}

impl CacheSettings {
    /// Default entry TTL as a [`Duration`].
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

/// Log output configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
