//! Self-healing WebSocket connections.
//!
//! The crate wraps a message-oriented transport with:
//!
//! - automatic reconnection with constant or exponential backoff and jitter
//! - an application-level heartbeat that force-closes silently dead connections
//! - a typed `{action, payload, metadata}` envelope with action-keyed listeners and
//!   optional acknowledgments
//!
//! # Architecture
//!
//! - [`Controller`]: runtime-agnostic state machine driven by transport events and timer
//!   firings, generic over a [`Connector`](transport::Connector) and a
//!   [`Scheduler`](timer::Scheduler)
//! - [`ws::Client`] (feature `ws`): async handle running a [`Controller`] on tokio with a
//!   tungstenite transport
//!
//! # Example
//!
//! ```rust, no_run
//! # #[cfg(feature = "ws")]
//! # async fn example() -> resilient_socket::Result<()> {
//! use resilient_socket::ws::Client;
//! use resilient_socket::{Config, Hooks};
//! use serde_json::json;
//!
//! let client = Client::new("wss://example.com/socket", Config::default(), Hooks::new())?;
//! client.on("greeting", |payload| println!("got {payload:?}"))?;
//! client.set_metadata(json!({ "user": "alice" }))?;
//! client.emit("hello", Some(json!({ "k": 1 })))?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod controller;
pub mod envelope;
pub mod error;
pub mod hooks;
pub mod registry;
pub mod timer;
pub mod transport;
#[cfg(feature = "ws")]
pub mod ws;

pub use config::Config;
pub use controller::{ConnectionState, Controller, Reachability};
pub use envelope::Envelope;
pub use hooks::{Disconnect, Hooks};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
