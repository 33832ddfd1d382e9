//! Transport handle contract consumed by the [`Controller`](crate::Controller).
//!
//! A transport is any full-duplex, message-framed channel that can be opened and
//! closed. The controller never waits on it: [`Connector::open`] returns a handle
//! immediately and the outcome is reported later as [`TransportEvent`]s tagged with
//! the [`ConnectionId`] the connector was given.

use std::fmt;

use url::Url;

use crate::Result;
use crate::error::TransportError;

/// Normal closure; the only code that does not trigger a reconnect.
pub const NORMAL_CLOSURE: u16 = 1000;
/// The endpoint is going away.
pub const GOING_AWAY: u16 = 1001;
/// A close frame arrived without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// The connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Used when the host reports the network as unreachable.
pub const NETWORK_UNREACHABLE: u16 = 1011;
/// Used when the heartbeat declares the connection dead.
pub const HEARTBEAT_FAILURE: u16 = 1013;

/// Identifies one transport opened by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A single transport message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Details of a finished connection.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    /// Whether the closing handshake completed
    pub was_clean: bool,
}

impl CloseEvent {
    #[must_use]
    pub fn new<S: Into<String>>(code: u16, reason: S, was_clean: bool) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean,
        }
    }

    /// A normal closure is terminal; every other code is retried.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == NORMAL_CLOSURE
    }
}

/// Lifecycle notifications a transport reports back to the controller.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(Frame),
    Error(TransportError),
    Close(CloseEvent),
}

/// A live connection.
pub trait Transport {
    fn ready_state(&self) -> ReadyState;

    /// Queue `frame` for sending. Fails when the transport is not open.
    fn send(&mut self, frame: Frame) -> Result<()>;

    /// Start the closing handshake. A [`TransportEvent::Close`] follows.
    /// Closing a transport that is already closing or closed does nothing.
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens transports.
pub trait Connector {
    type Transport: Transport;

    /// Begin connecting to `url`, offering `protocols` as sub-protocols. Events for the
    /// returned transport must carry `id`.
    fn open(&mut self, id: ConnectionId, url: &Url, protocols: &[String]) -> Self::Transport;
}
