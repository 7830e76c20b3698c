//! # feedwire-settings
//!
//! Configuration for the feedwire subscription orchestrator.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`FeedwireSettings::default()`]
//! 2. **User file**: `~/.feedwire/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `FEEDWIRE_*` overrides (highest priority)
//!
//! | Env var | Field | Default |
//! |---|---|---|
//! | `FEEDWIRE_WS_SUBSCRIPTION_TTL` | `ws.subscriptionTtlMs` | 120000 |
//! | `FEEDWIRE_WS_SUBSCRIPTION_UNRESPONSIVE_TTL` | `ws.subscriptionUnresponsiveTtlMs` | 120000 |
//! | `FEEDWIRE_WS_EVENT_CAPACITY` | `ws.eventCapacity` | 1024 |
//! | `FEEDWIRE_CACHE_MAX_AGE` | `cache.maxAgeMs` | 90000 |
//! | `FEEDWIRE_CACHE_MAX_ITEMS` | `cache.maxItems` | 1000 |
//! | `FEEDWIRE_LOG_LEVEL` | `logging.level` | `info` |
//! | `FEEDWIRE_LOG_JSON` | `logging.json` | `false` |
//!
//! ## Crate Position
//!
//! Leaf crate. Depended on by feedwire-runtime.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{CacheSettings, FeedwireSettings, LoggingSettings, WsSettings};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
