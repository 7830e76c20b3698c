//! Adapter request, context and response types.
//!
//! These mirror the shape a poll-style adapter sees, so the same request value
//! can key both a polled and a pushed cache entry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::errors::CoreError;
use crate::ids::{canonical_json, digest_json};

/// Field names that carry the base asset of a price feed, in lookup order.
const BASE_ALIASES: &[&str] = &["base", "from", "coin", "symbol", "asset"];

/// Field names that carry the quote asset of a price feed, in lookup order.
const QUOTE_ALIASES: &[&str] = &["quote", "to", "convert", "market"];

/// Debug markers attached to a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DebugMeta {
    /// The value originated from a push (WebSocket) channel.
    pub ws: bool,
}

/// Metrics metadata attached to a request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsMeta {
    /// Precomputed feed identity.
    pub feed_id: String,
}

/// A data request as an adapter receives it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterRequest {
    /// Caller-assigned request (job run) id.
    #[serde(default)]
    pub id: String,
    /// Adapter endpoint the request targets, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Request parameters.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Debug markers. Never part of the cache identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugMeta>,
    /// Metrics metadata. Never part of the cache identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_meta: Option<MetricsMeta>,
}

impl AdapterRequest {
    /// Build a request from an id and a JSON object of parameters.
    ///
    /// Non-object `data` values produce an empty parameter map.
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            data,
            ..Self::default()
        }
    }

    /// Parse a request from its JSON form. `data`, when present, must be an object.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        if value.get("data").is_some_and(|data| !data.is_object()) {
            return Err(CoreError::InvalidRequest("data must be an object".into()));
        }
        serde_json::from_value(value).map_err(|e| CoreError::InvalidRequest(e.to_string()))
    }

    /// Set the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The parameter value for `field`, if present.
    pub fn param(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Identity of this request for caching and input comparison.
    ///
    /// Covers `endpoint` and `data` only; `id`, `debug` and `metrics_meta` are ignored.
    pub fn fingerprint(&self) -> String {
        digest_json(&json!({
            "endpoint": self.endpoint,
            "data": Value::Object(self.data.clone()),
        }))
    }

    /// Feed identity used as a metrics label.
    pub fn feed_id(&self) -> String {
        feed_id(self)
    }

    /// Copy of this request marked as originating from a push channel.
    #[must_use]
    pub fn as_push_write(&self) -> Self {
        let mut request = self.clone();
        request.debug = Some(DebugMeta { ws: true });
        request.metrics_meta = Some(MetricsMeta {
            feed_id: feed_id(self),
        });
        request
    }
}

/// Caller-scoped metadata carried alongside a request.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdapterContext {
    /// Cache max age override in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_max_age_ms: Option<u64>,
    /// Free-form caller metadata.
    pub meta: Map<String, Value>,
}

/// A normalized adapter response.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterResponse {
    /// Request id this response answers.
    #[serde(default)]
    pub job_run_id: String,
    /// HTTP-style status code.
    pub status_code: u16,
    /// Provider payload.
    #[serde(default)]
    pub data: Value,
    /// Headline result value.
    pub result: Value,
}

impl AdapterResponse {
    /// Successful response for `input` carrying `result` and the raw provider payload.
    pub fn success(input: &AdapterRequest, result: Value, data: Value) -> Self {
        Self {
            job_run_id: input.id.clone(),
            status_code: 200,
            data,
            result,
        }
    }
}

/// Derive the feed identity of a request.
///
/// Resolution order: explicit `metricsMeta.feedId`, then `BASE/QUOTE` from the
/// common base/quote parameter aliases, then the canonical JSON of `data`.
pub fn feed_id(request: &AdapterRequest) -> String {
    if let Some(meta) = &request.metrics_meta {
        return meta.feed_id.clone();
    }
    let base = first_string(&request.data, BASE_ALIASES);
    let quote = first_string(&request.data, QUOTE_ALIASES);
    match (base, quote) {
        (Some(base), Some(quote)) => format!("{}/{}", base.to_uppercase(), quote.to_uppercase()),
        (Some(base), None) => base.to_uppercase(),
        _ => canonical_json(&Value::Object(request.data.clone())),
    }
}

fn first_string<'a>(data: &'a Map<String, Value>, aliases: &[&str]) -> Option<&'a str> {
    aliases
        .iter()
        .find_map(|alias| data.get(*alias).and_then(Value::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_id_from_base_and_quote() {
        let req = AdapterRequest::new("1", json!({"from": "eth", "to": "usd"}));
        assert_eq!(req.feed_id(), "ETH/USD");
    }

    #[test]
    fn feed_id_from_base_only() {
        let req = AdapterRequest::new("1", json!({"asset": "btc"}));
        assert_eq!(req.feed_id(), "BTC");
    }

    #[test]
    fn feed_id_prefers_metrics_meta() {
        let mut req = AdapterRequest::new("1", json!({"base": "eth", "quote": "usd"}));
        req.metrics_meta = Some(MetricsMeta {
            feed_id: "custom".into(),
        });
        assert_eq!(req.feed_id(), "custom");
    }

    #[test]
    fn feed_id_falls_back_to_canonical_data() {
        let req = AdapterRequest::new("1", json!({"address": "0xabc", "chain": "mainnet"}));
        assert_eq!(req.feed_id(), r#"{"address":"0xabc","chain":"mainnet"}"#);
    }

    #[test]
    fn fingerprint_ignores_id_and_debug() {
        let a = AdapterRequest::new("1", json!({"base": "ETH"}));
        let mut b = AdapterRequest::new("2", json!({"base": "ETH"}));
        b.debug = Some(DebugMeta { ws: true });
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_covers_endpoint_and_data() {
        let a = AdapterRequest::new("1", json!({"base": "ETH"}));
        let b = AdapterRequest::new("1", json!({"base": "BTC"}));
        let c = AdapterRequest::new("1", json!({"base": "ETH"})).with_endpoint("crypto");
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn push_write_marks_debug_and_feed() {
        let req = AdapterRequest::new("1", json!({"base": "eth", "quote": "usd"}));
        let push = req.as_push_write();
        assert_eq!(push.debug, Some(DebugMeta { ws: true }));
        assert_eq!(push.metrics_meta.unwrap().feed_id, "ETH/USD");
        assert_eq!(push.data, req.data);
    }

    #[test]
    fn non_object_data_is_empty() {
        let req = AdapterRequest::new("1", json!("not an object"));
        assert!(req.data.is_empty());
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: AdapterRequest = serde_json::from_value(json!({
            "id": "9",
            "data": {"base": "ETH"},
            "metricsMeta": {"feedId": "ETH"}
        }))
        .unwrap();
        assert_eq!(req.id, "9");
        assert_eq!(req.metrics_meta.unwrap().feed_id, "ETH");
    }

    #[test]
    fn from_value_rejects_non_object_data() {
        let err = AdapterRequest::from_value(json!({"id": "1", "data": [1, 2]})).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
        let ok = AdapterRequest::from_value(json!({"id": "1", "endpoint": "price"})).unwrap();
        assert_eq!(ok.endpoint.as_deref(), Some("price"));
    }

    #[test]
    fn success_response_carries_job_id() {
        let req = AdapterRequest::new("job-7", json!({}));
        let resp = AdapterResponse::success(&req, json!(1.5), json!({"price": 1.5}));
        assert_eq!(resp.job_run_id, "job-7");
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.result, json!(1.5));
    }
}
