//! Caller callbacks invoked on lifecycle transitions.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::TransportError;
use crate::transport::{CloseEvent, Frame};

/// What caused a reconnect to be scheduled.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The transport reported an error
    Error(TransportError),
    /// The transport closed with a non-normal code
    Close(CloseEvent),
    /// The caller asked for a reconnect
    Requested,
}

/// Lifecycle callbacks. Every hook is optional.
///
/// A hook that panics is logged and skipped; the connection keeps running.
///
/// ```
/// use resilient_socket::Hooks;
///
/// let hooks = Hooks::new()
///     .on_connect(|| println!("connected"))
///     .on_reconnecting(|attempt, cause| println!("attempt {attempt} after {cause:?}"));
/// ```
#[derive(Clone, Default)]
pub struct Hooks {
    connect: Option<Arc<dyn Fn() + Send + Sync>>,
    close: Option<Arc<dyn Fn(&CloseEvent) + Send + Sync>>,
    message: Option<Arc<dyn Fn(&Frame) + Send + Sync>>,
    error: Option<Arc<dyn Fn(&TransportError) + Send + Sync>>,
    reconnecting: Option<Arc<dyn Fn(u32, &Disconnect) + Send + Sync>>,
    overflow: Option<Arc<dyn Fn(&Disconnect) + Send + Sync>>,
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called when a transport finishes opening.
    #[must_use]
    pub fn on_connect<F: Fn() + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.connect = Some(Arc::new(f));
        self
    }

    /// Called for every close of the current transport, normal or not.
    #[must_use]
    pub fn on_close<F: Fn(&CloseEvent) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.close = Some(Arc::new(f));
        self
    }

    /// Called with every raw inbound frame, before envelope decoding.
    #[must_use]
    pub fn on_message<F: Fn(&Frame) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.message = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_error<F: Fn(&TransportError) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    /// Called when a retry timer fires, with the attempt number about to be made.
    #[must_use]
    pub fn on_reconnecting<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &Disconnect) + Send + Sync + 'static,
    {
        self.reconnecting = Some(Arc::new(f));
        self
    }

    /// Called once when reconnect attempts are exhausted.
    #[must_use]
    pub fn on_overflow<F: Fn(&Disconnect) + Send + Sync + 'static>(mut self, f: F) -> Self {
        self.overflow = Some(Arc::new(f));
        self
    }

    pub(crate) fn connect(&self) {
        if let Some(f) = &self.connect {
            guarded("on_connect", || f());
        }
    }

    pub(crate) fn close(&self, event: &CloseEvent) {
        if let Some(f) = &self.close {
            guarded("on_close", || f(event));
        }
    }

    pub(crate) fn message(&self, frame: &Frame) {
        if let Some(f) = &self.message {
            guarded("on_message", || f(frame));
        }
    }

    pub(crate) fn error(&self, error: &TransportError) {
        if let Some(f) = &self.error {
            guarded("on_error", || f(error));
        }
    }

    pub(crate) fn reconnecting(&self, attempt: u32, cause: &Disconnect) {
        if let Some(f) = &self.reconnecting {
            guarded("on_reconnecting", || f(attempt, cause));
        }
    }

    pub(crate) fn overflow(&self, cause: &Disconnect) {
        if let Some(f) = &self.overflow {
            guarded("on_overflow", || f(cause));
        }
    }
}

/// Run a caller hook, containing any panic so the host loop keeps running.
fn guarded<F: FnOnce()>(hook: &'static str, f: F) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        #[cfg(feature = "tracing")]
        tracing::warn!(hook, "Hook panicked");
        #[cfg(not(feature = "tracing"))]
        let _ = hook;
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_connect", &self.connect.is_some())
            .field("on_close", &self.close.is_some())
            .field("on_message", &self.message.is_some())
            .field("on_error", &self.error.is_some())
            .field("on_reconnecting", &self.reconnecting.is_some())
            .field("on_overflow", &self.overflow.is_some())
            .finish()
    }
}
