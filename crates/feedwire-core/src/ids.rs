//! Connection and subscription keys.
//!
//! A [`ConnectionKey`] names one physical socket. A [`SubscriptionKey`] is the
//! SHA-256 digest of a provider subscribe message in canonical JSON form, so two
//! requests that resolve to the same wire subscription share one key.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

macro_rules! key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw key string.
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The key as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

key_type!(
    /// Identifier for one physical socket, shared by every subscription routed through it.
    ConnectionKey
);

key_type!(
    /// Deterministic identity of a provider-level subscription.
    SubscriptionKey
);

impl SubscriptionKey {
    /// Derive the key from a provider subscribe message.
    pub fn from_message(message: &Value) -> Self {
        Self(digest_json(message))
    }
}

/// Rebuild a JSON value with every object's keys in sorted order.
///
/// Serialization order then no longer depends on how the value was built.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                let _ = sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical JSON text for a value (sorted object keys, no whitespace).
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Lowercase hex SHA-256 of the canonical JSON text of a value.
pub fn digest_json(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    format!("{:x}", hasher.finalize())
}
