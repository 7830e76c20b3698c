//! # feedwire-runtime
//!
//! Shared WebSocket subscription orchestrator.
//!
//! - **Orchestrator**: [`orchestrator::WsOrchestrator`], a single task owning all
//!   connection and subscription state, driven by an ordered event stream
//! - **State**: [`store::WsState`] and its reducer
//! - **Connections**: one socket per connection key, opened on first demand and
//!   shared by every subscription on it
//! - **Multiplexing**: subscribe/unsubscribe frames, inbound demultiplexing and
//!   first-message fulfilment
//! - **Timeouts**: idle reaping and unresponsive-channel resubscription
//! - **Cache bridge**: pushed values written under the key pollers read
//! - **Metrics**: [`metrics`] counters and gauges through the `metrics` facade
//! - **Transport**: the [`transport::WsTransport`] seam and its `tokio-tungstenite`
//!   implementation
//!
//! ## Crate Position
//!
//! Top of the stack. Depends on feedwire-core and feedwire-settings.

#![deny(unsafe_code)]

mod bridge;
mod command;
mod connection;
pub mod errors;
pub mod metrics;
mod monitor;
mod multiplexer;
pub mod orchestrator;
mod reaper;
pub mod store;
mod timers;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use errors::{RuntimeError, TransportError};
pub use monitor::UNRESPONSIVE_REASON;
pub use orchestrator::{Collaborators, WsOrchestrator, init_logging};
pub use store::{ConnectionState, SubscriptionState, WsState};
pub use transport::{CloseInfo, SocketFrame, TungsteniteTransport, WsSocket, WsTransport};
