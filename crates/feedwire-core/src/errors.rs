//! Error types for the shared collaborators.

use thiserror::Error;

/// Top-level error for the foundation crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An inbound adapter request could not be interpreted.
    #[error("invalid adapter request: {0}")]
    InvalidRequest(String),
    /// Cache failure.
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// Provider handler failure.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Errors raised by a [`crate::cache::Cache`] implementation.
///
/// Callers on the push path log these and move on; they never abort a pipeline.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store could not be reached or refused the operation.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    /// A value could not be encoded or decoded.
    #[error("cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a provider [`crate::handler::WsHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A dynamic connection URL could not be resolved.
    #[error("failed to resolve connection url: {0}")]
    UrlResolution(String),
}
