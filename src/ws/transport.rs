use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::Event;
use crate::Result;
use crate::error::{Error, SendFailure, TransportError};
use crate::transport::{
    ABNORMAL_CLOSURE, CloseEvent, ConnectionId, Connector, Frame, NO_STATUS_RECEIVED,
    ReadyState, Transport, TransportEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Upper bound on any closing handshake, from sending the close frame to the peer's reply.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ready state shared between a [`WsTransport`] and its pump task.
#[derive(Debug, Clone)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new(state: ReadyState) -> Self {
        Self(Arc::new(AtomicU8::new(Self::encode(state))))
    }

    const fn encode(state: ReadyState) -> u8 {
        match state {
            ReadyState::Connecting => 0,
            ReadyState::Open => 1,
            ReadyState::Closing => 2,
            ReadyState::Closed => 3,
        }
    }

    fn load(&self) -> ReadyState {
        match self.0.load(Ordering::Acquire) {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            2 => ReadyState::Closing,
            _ => ReadyState::Closed,
        }
    }

    fn store(&self, state: ReadyState) {
        self.0.store(Self::encode(state), Ordering::Release);
    }
}

/// Outbound work for a pump task.
#[derive(Debug)]
enum Outgoing {
    Frame(Message),
    Close(u16, String),
}

/// Opens [`WsTransport`]s and reports their events to the client's event loop.
#[derive(Debug, Clone)]
pub struct WsConnector {
    events: mpsc::UnboundedSender<Event>,
}

impl WsConnector {
    pub(crate) fn new(events: mpsc::UnboundedSender<Event>) -> Self {
        Self { events }
    }
}

impl Connector for WsConnector {
    type Transport = WsTransport;

    fn open(&mut self, id: ConnectionId, url: &Url, protocols: &[String]) -> WsTransport {
        let state = SharedState::new(ReadyState::Connecting);
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let pump = Pump {
            id,
            state: state.clone(),
            commands: commands_rx,
            events: self.events.clone(),
        };
        let request = build_request(url, protocols);
        tokio::spawn(pump.run(request));

        WsTransport {
            state,
            commands: commands_tx,
        }
    }
}

/// A tungstenite connection driven by a background pump task.
#[derive(Debug)]
pub struct WsTransport {
    state: SharedState,
    commands: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    fn ready_state(&self) -> ReadyState {
        self.state.load()
    }

    fn send(&mut self, frame: Frame) -> Result<()> {
        if self.state.load() != ReadyState::Open {
            return Err(SendFailure::NotConnected.into());
        }

        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };

        self.commands
            .send(Outgoing::Frame(message))
            .map_err(|_e| SendFailure::Rejected("connection task has stopped".to_owned()))?;
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        if matches!(self.state.load(), ReadyState::Closing | ReadyState::Closed) {
            return;
        }

        self.state.store(ReadyState::Closing);
        _ = self.commands.send(Outgoing::Close(code, reason.to_owned()));
    }
}

fn build_request(url: &Url, protocols: &[String]) -> Result<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| Error::from(TransportError::Open(e.to_string())))?;

    if !protocols.is_empty() {
        let value = HeaderValue::from_str(&protocols.join(", "))
            .map_err(|e| Error::validation(format!("invalid sub-protocol list: {e}")))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    Ok(request)
}

/// Background task owning one connection.
struct Pump {
    id: ConnectionId,
    state: SharedState,
    commands: mpsc::UnboundedReceiver<Outgoing>,
    events: mpsc::UnboundedSender<Event>,
}

impl Pump {
    fn report(&self, event: TransportEvent) {
        _ = self.events.send(Event::Transport(self.id, event));
    }

    fn fail(&self, error: TransportError) {
        self.state.store(ReadyState::Closed);
        self.report(TransportEvent::Error(error));
        self.report(TransportEvent::Close(CloseEvent::new(
            ABNORMAL_CLOSURE,
            "",
            false,
        )));
    }

    fn finish(&self, close: CloseEvent) {
        self.state.store(ReadyState::Closed);
        self.report(TransportEvent::Close(close));
    }

    async fn run(mut self, request: Result<Request>) {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                self.fail(TransportError::Open(e.to_string()));
                return;
            }
        };

        let connected = tokio::select! {
            result = connect_async(request) => result,
            command = self.commands.recv() => {
                // Only a close can be queued before the handshake completes.
                if let Some(Outgoing::Close(code, reason)) = command {
                    self.finish(CloseEvent::new(code, reason, false));
                }
                return;
            }
        };

        let ws_stream = match connected {
            Ok((ws_stream, _)) => ws_stream,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(id = %self.id, error = %e, "Unable to connect");
                self.fail(TransportError::Open(e.to_string()));
                return;
            }
        };

        // A close requested while the handshake was in flight wins over the open.
        if self.state.load() == ReadyState::Closing {
            if let Ok(Outgoing::Close(code, reason)) = self.commands.try_recv() {
                self.close(ws_stream, code, reason).await;
            }
            return;
        }

        self.state.store(ReadyState::Open);
        self.report(TransportEvent::Open);
        self.handle_connection(ws_stream).await;
    }

    /// Pump frames in both directions until either side closes.
    async fn handle_connection(&mut self, ws_stream: WsStream) {
        let (mut write, mut read) = ws_stream.split();
        let mut backlog = VecDeque::new();

        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            #[cfg(feature = "tracing")]
                            tracing::trace!(id = %self.id, text = text.as_str(), "Received WebSocket text message");
                            self.report(TransportEvent::Message(Frame::Text(text.as_str().to_owned())));
                        }
                        Some(Ok(Message::Binary(bytes))) => {
                            self.report(TransportEvent::Message(Frame::Binary(bytes.to_vec())));
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let close = frame.map_or_else(
                                || CloseEvent::new(NO_STATUS_RECEIVED, "", true),
                                |f| CloseEvent::new(u16::from(f.code), f.reason.as_str(), true),
                            );
                            // Flushes the close reply tungstenite queued for the peer.
                            _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, write.close()).await;
                            self.finish(close);
                            return;
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite; raw frames are not surfaced.
                        }
                        Some(Err(e)) => {
                            self.fail(TransportError::Protocol(e.to_string()));
                            return;
                        }
                        None => {
                            self.fail(TransportError::Protocol("connection reset".to_owned()));
                            return;
                        }
                    }
                }

                command = self.commands.recv() => {
                    match command {
                        Some(Outgoing::Frame(message)) => backlog.push_back(message),
                        Some(Outgoing::Close(code, reason)) => {
                            let Ok(ws_stream) = read.reunite(write) else {
                                self.finish(CloseEvent::new(code, reason, false));
                                return;
                            };
                            self.close(ws_stream, code, reason).await;
                            return;
                        }
                        None => {
                            // The handle was dropped without closing.
                            _ = timeout(CLOSE_HANDSHAKE_TIMEOUT, write.send(Message::Close(None))).await;
                            self.state.store(ReadyState::Closed);
                            return;
                        }
                    }

                    while let Some(message) = backlog.pop_front() {
                        match write_frame(&mut write, message, &mut self.commands, &mut backlog).await {
                            Written::Sent => {}
                            Written::Failed(e) => {
                                self.fail(TransportError::Protocol(e.to_string()));
                                return;
                            }
                            Written::Closed(code, reason) => {
                                // The peer is not draining the socket; the stream is abandoned.
                                #[cfg(feature = "tracing")]
                                tracing::debug!(id = %self.id, code, "Close requested during a stalled write");
                                self.finish(CloseEvent::new(code, reason, false));
                                return;
                            }
                            Written::Dropped => {
                                self.state.store(ReadyState::Closed);
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Run the closing handshake and report the locally requested code.
    ///
    /// Sending the close frame and waiting for the reply share one deadline.
    async fn close(&self, mut ws_stream: WsStream, code: u16, reason: String) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.clone().into(),
        };

        let handshake = async {
            ws_stream.close(Some(frame)).await.is_ok() && drain(&mut ws_stream).await
        };
        let was_clean = timeout(CLOSE_HANDSHAKE_TIMEOUT, handshake)
            .await
            .unwrap_or(false);

        #[cfg(feature = "tracing")]
        tracing::debug!(id = %self.id, code, was_clean, "Closing handshake finished");

        self.finish(CloseEvent::new(code, reason, was_clean));
    }
}

/// Result of writing one outbound frame.
enum Written {
    Sent,
    Failed(WsError),
    /// A close was requested before the write completed.
    Closed(u16, String),
    /// The handle was dropped before the write completed.
    Dropped,
}

/// Write `message`, abandoning it as soon as a close is requested.
///
/// Frames queued while the write is pending are appended to `backlog`.
async fn write_frame(
    write: &mut WsSink,
    message: Message,
    commands: &mut mpsc::UnboundedReceiver<Outgoing>,
    backlog: &mut VecDeque<Message>,
) -> Written {
    let send = write.send(message);
    tokio::pin!(send);

    loop {
        tokio::select! {
            result = &mut send => {
                return match result {
                    Ok(()) => Written::Sent,
                    Err(e) => Written::Failed(e),
                };
            }
            command = commands.recv() => match command {
                Some(Outgoing::Frame(next)) => backlog.push_back(next),
                Some(Outgoing::Close(code, reason)) => return Written::Closed(code, reason),
                None => return Written::Dropped,
            },
        }
    }
}

/// Read until the peer's close frame. Returns whether it arrived.
async fn drain(ws_stream: &mut WsStream) -> bool {
    while let Some(message) = ws_stream.next().await {
        match message {
            Ok(Message::Close(_)) => return true,
            Ok(_) => {}
            Err(_) => return false,
        }
    }

    // tungstenite ends the stream once the handshake is complete.
    true
}
