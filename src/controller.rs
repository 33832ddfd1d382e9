//! The connection lifecycle state machine.
//!
//! [`Controller`] owns the current transport, the three timers, the listener registry
//! and the outbound metadata. It never blocks and never spawns: the host delivers
//! transport events, timer firings and reachability signals one at a time through the
//! `handle_*` methods, and the controller reacts by calling into its [`Connector`],
//! [`Scheduler`] and [`Hooks`].

use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::Result;
use crate::backoff::retry_delay;
use crate::config::Config;
use crate::envelope::{self, ACK_ACTION, PING_ACTION};
use crate::error::{Error, SendFailure, TransportError};
use crate::hooks::{Disconnect, Hooks};
use crate::registry::{ListenerOutcome, Registry};
use crate::timer::{Scheduler, TimerKind, TimerToken, Timers};
use crate::transport::{
    CloseEvent, ConnectionId, Connector, Frame, HEARTBEAT_FAILURE, NETWORK_UNREACHABLE,
    NORMAL_CLOSURE, ReadyState, Transport as _, TransportEvent,
};

const RESTART_REASON: &str = "Restarting connection";
const HEARTBEAT_FAILURE_REASON: &str = "Heartbeat failed";
const UNREACHABLE_REASON: &str = "Network is unreachable";

/// Lifecycle state of a [`Controller`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never started
    Idle,
    /// A transport is opening
    Connecting,
    /// The current transport is open
    Open {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting for the retry timer
    ReconnectPending {
        /// Attempt number the timer will make
        attempt: u32,
    },
    /// Reconnect attempts are exhausted; waits for [`Controller::start`]
    Overflow,
    /// Closed by the caller; waits for [`Controller::start`]
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Host network reachability signal.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Reachable,
    Unreachable,
}

/// Resilient connection controller.
///
/// # Type Parameters
///
/// - `C`: opens transports, see [`Connector`]
/// - `S`: schedules timers, see [`Scheduler`]
pub struct Controller<C: Connector, S: Scheduler> {
    url: Url,
    config: Config,
    hooks: Hooks,
    connector: C,
    scheduler: S,
    transport: Option<(ConnectionId, C::Transport)>,
    next_id: u64,
    retry_count: u32,
    retry_cause: Option<Disconnect>,
    state: ConnectionState,
    metadata: Option<Value>,
    registry: Registry,
    timers: Timers,
}

impl<C: Connector, S: Scheduler> Controller<C, S> {
    /// Create an idle controller. Nothing is opened until [`Controller::start`].
    pub fn new(
        url: &str,
        config: Config,
        hooks: Hooks,
        connector: C,
        scheduler: S,
    ) -> Result<Self> {
        config.validate()?;

        let url = Url::parse(url)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "unsupported scheme `{}`, expected ws or wss",
                url.scheme()
            )));
        }

        let metadata = config.metadata.clone().filter(|m| !m.is_null());

        Ok(Self {
            url,
            config,
            hooks,
            connector,
            scheduler,
            transport: None,
            next_id: 0,
            retry_count: 0,
            retry_cause: None,
            state: ConnectionState::Idle,
            metadata,
            registry: Registry::new(),
            timers: Timers::default(),
        })
    }

    /// Open a new transport, replacing the current one if any.
    ///
    /// This also leaves [`ConnectionState::Overflow`] and [`ConnectionState::Closed`], but
    /// [`Controller::retry_count`] is kept: only a successful open resets it. Starting
    /// again after an overflow therefore gets no fresh retry budget, and the first
    /// failure before an open overflows again immediately.
    pub fn start(&mut self) {
        self.timers.disarm_all(&mut self.scheduler);

        if let Some((_, mut previous)) = self.transport.take() {
            previous.close(NORMAL_CLOSURE, RESTART_REASON);
        }

        self.next_id += 1;
        let id = ConnectionId(self.next_id);

        #[cfg(feature = "tracing")]
        tracing::debug!(%id, url = %self.url, retry_count = self.retry_count, "Connecting");

        let transport = self
            .connector
            .open(id, &self.url, &self.config.protocols);
        self.transport = Some((id, transport));
        self.state = ConnectionState::Connecting;
    }

    /// Cancel all timers and close the current transport. No reconnect happens until
    /// [`Controller::start`] is called again.
    pub fn close(&mut self, code: Option<u16>, reason: Option<&str>) {
        self.timers.disarm_all(&mut self.scheduler);
        self.retry_cause = None;

        if let Some((_, transport)) = &mut self.transport {
            transport.close(code.unwrap_or(NORMAL_CLOSURE), reason.unwrap_or_default());
        }

        self.state = ConnectionState::Closed;
    }

    /// Schedule a reconnect through the normal backoff path.
    pub fn retry(&mut self) {
        self.schedule_retry(Disconnect::Requested);
    }

    /// Send a raw frame on the current transport.
    pub fn send<F: Into<Frame>>(&mut self, frame: F) -> Result<()> {
        match &mut self.transport {
            Some((_, transport)) if transport.ready_state() == ReadyState::Open => {
                transport.send(frame.into())
            }
            _ => Err(SendFailure::NotConnected.into()),
        }
    }

    /// Serialize `value` as JSON and send it as a text frame.
    pub fn send_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send(text)
    }

    /// Send an envelope carrying the current metadata.
    ///
    /// Does nothing when the transport is not open.
    pub fn emit(&mut self, action: &str, payload: Option<&Value>) -> Result<()> {
        if action.is_empty() {
            return Err(SendFailure::EmptyAction.into());
        }

        if !self.is_open() {
            #[cfg(feature = "tracing")]
            tracing::debug!(action, "Dropping emit while not connected");
            return Ok(());
        }

        let text = envelope::encode(action, payload, self.metadata.as_ref())?;
        self.send(text)
    }

    /// Register `listener` for inbound envelopes with `action`.
    pub fn on<A, F, R>(&mut self, action: A, listener: F)
    where
        A: Into<String>,
        F: Fn(Option<&Value>) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        self.registry.register(action, listener);
    }

    /// Replace the metadata attached to outbound envelopes. `null` clears it.
    pub fn set_metadata(&mut self, metadata: Value) {
        self.metadata = (!metadata.is_null()).then_some(metadata);
    }

    #[must_use]
    pub fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// `true` unless the transport is absent, closing or closed.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.transport.as_ref().is_some_and(|(_, t)| {
            matches!(t.ready_state(), ReadyState::Connecting | ReadyState::Open)
        })
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Attempts made since the last successful open.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }

    /// Feed an event reported by the transport identified by `id`.
    ///
    /// Events from transports other than the current one are ignored.
    pub fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if self.transport.as_ref().is_none_or(|(current, _)| *current != id) {
            #[cfg(feature = "tracing")]
            tracing::trace!(%id, ?event, "Ignoring event from a replaced transport");
            return;
        }

        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(frame) => self.on_message(&frame),
            TransportEvent::Error(error) => self.on_error(error),
            TransportEvent::Close(close) => self.on_close(close),
        }
    }

    /// Feed a fired timer. Tokens that were cleared in the meantime are ignored.
    pub fn handle_timer(&mut self, token: TimerToken) {
        if !self.timers.accept(&mut self.scheduler, token) {
            return;
        }

        match token.kind {
            TimerKind::Retry => self.on_retry_timer(),
            TimerKind::Heartbeat => self.on_heartbeat_timer(),
            TimerKind::PongTimeout => self.on_pong_timeout(),
        }
    }

    pub fn handle_reachability(&mut self, signal: Reachability) {
        #[cfg(feature = "tracing")]
        tracing::debug!(?signal, "Network reachability changed");

        match signal {
            Reachability::Reachable => self.start(),
            Reachability::Unreachable => {
                self.close(Some(NETWORK_UNREACHABLE), Some(UNREACHABLE_REASON));
            }
        }
    }

    fn is_open(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|(_, t)| t.ready_state() == ReadyState::Open)
    }

    fn on_open(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %self.url, "Connection open");

        self.retry_count = 0;
        self.retry_cause = None;
        self.hooks.connect();
        self.state = ConnectionState::Open {
            since: Instant::now(),
        };
        self.arm_heartbeat();
    }

    fn on_message(&mut self, frame: &Frame) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.hooks.message(frame);

        match envelope::decode(frame) {
            Ok(envelope) => {
                if self.registry.has_listeners(&envelope.action) {
                    self.registry
                        .dispatch(&envelope.action, envelope.payload.as_ref());
                    self.acknowledge(&envelope.action);
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(?frame, error = %e, "Failed to parse envelope");
                #[cfg(not(feature = "tracing"))]
                let _: &Error = &e;
            }
        }

        if self.state.is_open() {
            self.arm_heartbeat();
        }
    }

    fn acknowledge(&mut self, action: &str) {
        if !self.config.enable_acknowledge {
            return;
        }

        let payload = envelope::acknowledgement(action);
        if let Err(e) = self.emit(ACK_ACTION, Some(&payload)) {
            #[cfg(feature = "tracing")]
            tracing::warn!(action, error = %e, "Failed to acknowledge envelope");
            #[cfg(not(feature = "tracing"))]
            let _: &Error = &e;
        }
    }

    fn on_error(&mut self, error: TransportError) {
        if self.state == ConnectionState::Closed {
            return;
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(%error, "Transport error");

        self.hooks.error(&error);
        self.schedule_retry(Disconnect::Error(error));
    }

    fn on_close(&mut self, close: CloseEvent) {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            code = close.code,
            reason = %close.reason,
            was_clean = close.was_clean,
            "Connection closed"
        );

        self.hooks.close(&close);
        if !close.is_normal() {
            self.schedule_retry(Disconnect::Close(close));
        }
    }

    fn schedule_retry(&mut self, cause: Disconnect) {
        if matches!(
            self.state,
            ConnectionState::Closed | ConnectionState::Overflow
        ) {
            return;
        }

        self.timers.disarm_all(&mut self.scheduler);

        if let Some(max) = self.config.reconnect.max_attempts
            && self.retry_count >= max
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(max_attempts = max, "Reconnect attempts exhausted");

            self.state = ConnectionState::Overflow;
            self.retry_cause = None;
            self.hooks.overflow(&cause);
            return;
        }

        let delay = retry_delay(&self.config.reconnect, self.retry_count);
        let attempt = self.retry_count.saturating_add(1);

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, ?delay, "Scheduling reconnect");

        self.timers
            .arm(&mut self.scheduler, TimerKind::Retry, delay);
        self.retry_cause = Some(cause);
        self.state = ConnectionState::ReconnectPending { attempt };
    }

    fn on_retry_timer(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
        let cause = self.retry_cause.take().unwrap_or(Disconnect::Requested);
        self.hooks.reconnecting(self.retry_count, &cause);
        self.start();
    }

    fn arm_heartbeat(&mut self) {
        if self.config.heartbeat.disabled {
            return;
        }

        let interval = self.config.heartbeat.interval;
        let pong_timeout = self.config.heartbeat.pong_timeout();
        self.timers
            .arm(&mut self.scheduler, TimerKind::Heartbeat, interval);
        self.timers
            .arm(&mut self.scheduler, TimerKind::PongTimeout, pong_timeout);
    }

    fn on_heartbeat_timer(&mut self) {
        if !self.is_open() {
            return;
        }

        if let Err(e) = self.emit(PING_ACTION, None) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Failed to send heartbeat");
            #[cfg(not(feature = "tracing"))]
            let _: &Error = &e;
        }
    }

    fn on_pong_timeout(&mut self) {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            error = %TransportError::HeartbeatTimeout,
            "No traffic received within {:?}",
            self.config.heartbeat.pong_timeout()
        );

        self.timers.disarm_all(&mut self.scheduler);
        if let Some((_, transport)) = &mut self.transport {
            transport.close(HEARTBEAT_FAILURE, HEARTBEAT_FAILURE_REASON);
        }
    }
}

impl<C: Connector, S: Scheduler> std::fmt::Debug for Controller<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("url", &self.url.as_str())
            .field("state", &self.state)
            .field("retry_count", &self.retry_count)
            .field("connection", &self.transport.as_ref().map(|(id, _)| *id))
            .field("metadata", &self.metadata)
            .field("listeners", &self.registry)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}
