//! # feedwire-core
//!
//! Foundation types shared by every feedwire crate.
//!
//! - **Keys**: [`ids::ConnectionKey`] and [`ids::SubscriptionKey`] newtypes, plus the
//!   canonical JSON digest used to derive subscription identities
//! - **Requests**: [`request::AdapterRequest`], [`request::AdapterContext`],
//!   [`request::AdapterResponse`] and feed-id derivation
//! - **Handlers**: the [`handler::WsHandler`] capability set each provider implements
//! - **Events**: [`events::WsEvent`], the ordered event taxonomy every component speaks
//! - **Cache**: the [`cache::Cache`] collaborator, [`cache::CacheKey`] derivation and an
//!   in-memory [`cache::LocalCache`]
//! - **Batching**: pluggable [`batch::BatchSplitter`] strategies
//! - **Errors**: [`errors::CoreError`], [`errors::CacheError`] and [`errors::HandlerError`]
//!   via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] and [`redact::redact_url`]
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by feedwire-settings and feedwire-runtime.

#![deny(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod errors;
pub mod events;
pub mod handler;
pub mod ids;
pub mod logging;
pub mod redact;
pub mod request;

pub use errors::{CacheError, CoreError, HandlerError};
pub use events::WsEvent;
pub use handler::{ConnectionDescriptor, WsHandler};
pub use ids::{ConnectionKey, SubscriptionKey};
pub use request::{AdapterContext, AdapterRequest, AdapterResponse};
