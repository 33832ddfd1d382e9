use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{Stream, StreamExt as _};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use super::scheduler::TokioScheduler;
use super::transport::WsConnector;
use super::Event;
use crate::Result;
use crate::config::Config;
use crate::controller::{ConnectionState, Controller, Reachability};
use crate::error::{Error, SendFailure};
use crate::hooks::Hooks;
use crate::registry::{ListenerError, ListenerOutcome};
use crate::transport::Frame;

const SHUTDOWN_REASON: &str = "Client shut down";

type SharedListener = Arc<dyn Fn(Option<&Value>) -> std::result::Result<(), ListenerError> + Send + Sync>;

/// Caller requests queued to the event loop.
pub(crate) enum Command {
    Start,
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
    Retry,
    Send(Frame),
    Emit {
        action: String,
        payload: Option<Value>,
    },
    Register(String, SharedListener),
    SetMetadata(Value),
}

/// Async handle to a resilient WebSocket connection.
///
/// The connection is opened as soon as the client is created. Cloning is cheap; all
/// clones drive the same connection, which shuts down once the last clone is dropped
/// or [`Client::shutdown`] is called.
///
/// # Example
///
/// ```rust, no_run
/// use resilient_socket::ws::Client;
/// use resilient_socket::{Config, Hooks};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let hooks = Hooks::new().on_connect(|| println!("connected"));
///     let client = Client::new("ws://localhost:8080", Config::default(), hooks)?;
///
///     client.on("chat", |payload| println!("chat: {payload:?}"))?;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    events: mpsc::UnboundedSender<Event>,
    state_rx: watch::Receiver<ConnectionState>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    _guard: Arc<DropGuard>,
}

impl Client {
    /// Create a client and start connecting to `url`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(url: &str, config: Config, hooks: Hooks) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        let controller = Controller::new(
            url,
            config,
            hooks,
            WsConnector::new(events_tx.clone()),
            TokioScheduler::new(events_tx.clone(), shutdown.child_token()),
        )?;

        let (state_tx, state_rx) = watch::channel(controller.state());
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(event_loop(
            controller,
            events_rx,
            state_tx,
            Arc::clone(&connected),
            shutdown.clone(),
        ));

        let client = Self {
            events: events_tx,
            state_rx,
            connected,
            shutdown: shutdown.clone(),
            _guard: Arc::new(shutdown.drop_guard()),
        };
        client.start()?;

        Ok(client)
    }

    /// Like [`Client::new`], additionally following network reachability `signals`.
    ///
    /// [`Reachability::Unreachable`] closes the connection and
    /// [`Reachability::Reachable`] restarts it.
    pub fn with_reachability<S>(url: &str, config: Config, hooks: Hooks, signals: S) -> Result<Self>
    where
        S: Stream<Item = Reachability> + Send + 'static,
    {
        let client = Self::new(url, config, hooks)?;

        let events = client.events.clone();
        let shutdown = client.shutdown.clone();
        tokio::spawn(async move {
            let mut signals = std::pin::pin!(signals);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    signal = signals.next() => {
                        let Some(signal) = signal else { break };
                        if events.send(Event::Reachability(signal)).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(client)
    }

    fn command(&self, command: Command) -> Result<()> {
        self.events
            .send(Event::Command(command))
            .map_err(|_e| Error::from(SendFailure::Rejected("client has shut down".to_owned())))
    }

    /// Open a fresh connection, replacing the current one.
    pub fn start(&self) -> Result<()> {
        self.command(Command::Start)
    }

    /// Close the connection. It stays closed until [`Client::start`].
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        self.command(Command::Close {
            code,
            reason: reason.map(ToOwned::to_owned),
        })
    }

    /// Schedule a reconnect through the normal backoff path.
    pub fn retry(&self) -> Result<()> {
        self.command(Command::Retry)
    }

    /// Send a raw frame.
    pub fn send<F: Into<Frame>>(&self, frame: F) -> Result<()> {
        if !self.state().is_open() {
            return Err(SendFailure::NotConnected.into());
        }

        self.command(Command::Send(frame.into()))
    }

    /// Serialize `value` as JSON and send it as a text frame.
    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.send(text)
    }

    /// Send an envelope with the current metadata. Does nothing while not connected.
    pub fn emit(&self, action: &str, payload: Option<Value>) -> Result<()> {
        if action.is_empty() {
            return Err(SendFailure::EmptyAction.into());
        }

        if !self.state().is_open() {
            #[cfg(feature = "tracing")]
            tracing::debug!(action, "Dropping emit while not connected");
            return Ok(());
        }

        self.command(Command::Emit {
            action: action.to_owned(),
            payload,
        })
    }

    /// Register `listener` for inbound envelopes with `action`.
    pub fn on<A, F, R>(&self, action: A, listener: F) -> Result<()>
    where
        A: Into<String>,
        F: Fn(Option<&Value>) -> R + Send + Sync + 'static,
        R: ListenerOutcome,
    {
        let listener: SharedListener =
            Arc::new(move |payload: Option<&Value>| listener(payload).into_outcome());
        self.command(Command::Register(action.into(), listener))
    }

    /// Replace the metadata attached to outbound envelopes. `null` clears it.
    pub fn set_metadata(&self, metadata: Value) -> Result<()> {
        self.command(Command::SetMetadata(metadata))
    }

    /// `true` while the transport is connecting or open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Receiver notified on every [`ConnectionState`] change.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the connection and stop the event loop and every timer.
    pub fn shutdown(&self) {
        self.connected.store(false, Ordering::Release);
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

async fn event_loop(
    mut controller: Controller<WsConnector, TokioScheduler>,
    mut events: mpsc::UnboundedReceiver<Event>,
    state_tx: watch::Sender<ConnectionState>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            Event::Transport(id, event) => controller.handle_transport_event(id, event),
            Event::Timer(token) => controller.handle_timer(token),
            Event::Reachability(signal) => controller.handle_reachability(signal),
            Event::Command(command) => execute(&mut controller, command),
        }

        connected.store(controller.is_connected(), Ordering::Release);
        let state = controller.state();
        state_tx.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    controller.close(None, Some(SHUTDOWN_REASON));
    connected.store(false, Ordering::Release);
    _ = state_tx.send(controller.state());

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %controller.url(), "Event loop stopped");
}

fn execute(controller: &mut Controller<WsConnector, TokioScheduler>, command: Command) {
    let outcome = match command {
        Command::Start => {
            controller.start();
            Ok(())
        }
        Command::Close { code, reason } => {
            controller.close(code, reason.as_deref());
            Ok(())
        }
        Command::Retry => {
            controller.retry();
            Ok(())
        }
        Command::Send(frame) => controller.send(frame),
        Command::Emit { action, payload } => controller.emit(&action, payload.as_ref()),
        Command::Register(action, listener) => {
            controller.on(action, move |payload: Option<&Value>| listener(payload));
            Ok(())
        }
        Command::SetMetadata(metadata) => {
            controller.set_metadata(metadata);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %e, "Queued request failed");
        #[cfg(not(feature = "tracing"))]
        let _ = &e;
    }
}
