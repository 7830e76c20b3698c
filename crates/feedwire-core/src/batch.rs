//! Strategies for fanning one logical request out into single-input requests.

use serde_json::Value;

use crate::request::AdapterRequest;

/// Splits a request into the single-input requests that each map to one subscription.
pub trait BatchSplitter: Send + Sync + 'static {
    /// Expand `request`. An empty result means nothing to subscribe.
    fn split(&self, request: &AdapterRequest) -> Vec<AdapterRequest>;
}

/// Passes every request through unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleRequest;

impl BatchSplitter for SingleRequest {
    fn split(&self, request: &AdapterRequest) -> Vec<AdapterRequest> {
        vec![request.clone()]
    }
}

/// Expands array-valued `data` fields into the cartesian product of their elements.
///
/// `{"base": ["ETH", "BTC"], "quote": "USD"}` becomes one request per base.
#[derive(Clone, Debug, Default)]
pub struct SplitArrayFields {
    fields: Option<Vec<String>>,
}

impl SplitArrayFields {
    /// Expand every array-valued field.
    pub fn all() -> Self {
        Self { fields: None }
    }

    /// Expand only the named fields.
    pub fn only<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
        }
    }

    fn selects(&self, field: &str) -> bool {
        self.fields
            .as_ref()
            .is_none_or(|fields| fields.iter().any(|f| f == field))
    }
}

impl BatchSplitter for SplitArrayFields {
    fn split(&self, request: &AdapterRequest) -> Vec<AdapterRequest> {
        let mut expanded = vec![request.clone()];
        for (field, value) in &request.data {
            let Value::Array(items) = value else {
                continue;
            };
            if !self.selects(field) {
                continue;
            }
            expanded = expanded
                .into_iter()
                .flat_map(|partial| {
                    items.iter().map(move |item| {
                        let mut single = partial.clone();
                        let _ = single.data.insert(field.clone(), item.clone());
                        single
                    })
                })
                .collect();
        }
        expanded
    }
}
