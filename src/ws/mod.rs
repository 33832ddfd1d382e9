//! Tokio runtime for the [`Controller`](crate::Controller).
//!
//! **Feature flag:** `ws` (required to use this module)
//!
//! # Architecture
//!
//! - [`Client`]: cloneable handle; every call is queued to a single event loop task
//! - [`WsConnector`]: opens tungstenite connections, one pump task per connection
//! - [`TokioScheduler`]: one sleeping task per armed timer
//!
//! Transport events, timer firings, reachability signals and caller commands all travel
//! through one unbounded channel, so the controller sees them strictly one at a time.

pub mod client;
pub mod scheduler;
pub mod transport;

pub use client::Client;
pub use scheduler::TokioScheduler;
pub use transport::{WsConnector, WsTransport};

use crate::controller::Reachability;
use crate::timer::TimerToken;
use crate::transport::{ConnectionId, TransportEvent};

/// Everything the event loop reacts to.
pub(crate) enum Event {
    Transport(ConnectionId, TransportEvent),
    Timer(TimerToken),
    Reachability(Reachability),
    Command(client::Command),
}
