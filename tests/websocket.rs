#![cfg(feature = "ws")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use resilient_socket::config::{Config, HeartbeatConfig, ReconnectConfig};
use resilient_socket::error::{Kind, SendFailure};
use resilient_socket::ws::Client;
use resilient_socket::{ConnectionState, Disconnect, Hooks, Reachability};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// What the server pushes to every connected client.
#[derive(Debug, Clone)]
enum Outbound {
    Text(String),
    Close(u16),
}

/// What the server saw from a client.
#[derive(Debug, PartialEq)]
enum Inbound {
    Text(Value),
    Closed(Option<u16>),
}

/// Mock WebSocket server.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast to ALL connected clients
    outbound_tx: broadcast::Sender<Outbound>,
    /// Frames received from clients
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    /// One entry per accepted connection
    accepted_rx: mpsc::UnboundedReceiver<usize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (outbound_tx, _) = broadcast::channel::<Outbound>(100);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        let broadcast_tx = outbound_tx.clone();

        tokio::spawn(async move {
            let mut count = 0;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                count += 1;
                drop(accepted_tx.send(count));

                let (mut write, mut read) = ws_stream.split();
                let inbound_tx = inbound_tx.clone();
                let mut outbound_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let value = serde_json::from_str(text.as_str()).unwrap();
                                        drop(inbound_tx.send(Inbound::Text(value)));
                                    }
                                    Some(Ok(Message::Close(frame))) => {
                                        let code = frame.map(|f| u16::from(f.code));
                                        drop(inbound_tx.send(Inbound::Closed(code)));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            msg = outbound_rx.recv() => {
                                let message = match msg {
                                    Ok(Outbound::Text(text)) => Message::Text(text.into()),
                                    Ok(Outbound::Close(code)) => Message::Close(Some(CloseFrame {
                                        code: CloseCode::from(code),
                                        reason: "server".into(),
                                    })),
                                    Err(_) => break,
                                };
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            outbound_tx,
            inbound_rx,
            accepted_rx,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/socket", self.addr)
    }

    fn send(&self, value: &Value) {
        drop(self.outbound_tx.send(Outbound::Text(value.to_string())));
    }

    fn close_all(&self, code: u16) {
        drop(self.outbound_tx.send(Outbound::Close(code)));
    }

    async fn recv(&mut self) -> Option<Inbound> {
        timeout(Duration::from_secs(3), self.inbound_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next inbound envelope with `action`, skipping everything else.
    async fn recv_action(&mut self, action: &str) -> Option<Value> {
        loop {
            match self.recv().await? {
                Inbound::Text(value) if value["action"] == action => return Some(value),
                _ => {}
            }
        }
    }

    /// Next close frame a client sent.
    async fn recv_close(&mut self) -> Option<Option<u16>> {
        loop {
            if let Inbound::Closed(code) = self.recv().await? {
                return Some(code);
            }
        }
    }

    async fn accepted(&mut self, within: Duration) -> Option<usize> {
        timeout(within, self.accepted_rx.recv()).await.ok().flatten()
    }
}

fn quiet_config() -> Config {
    Config::builder()
        .reconnect(
            ReconnectConfig::builder()
                .delay(Duration::from_millis(100))
                .build(),
        )
        .heartbeat(HeartbeatConfig::builder().disabled(true).build())
        .build()
}

async fn wait_open(client: &Client) {
    let mut state = client.state_receiver();
    timeout(Duration::from_secs(3), state.wait_for(|s| s.is_open()))
        .await
        .unwrap()
        .unwrap();
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn connects_on_construction() {
        let mut server = MockWsServer::start().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = Hooks::new().on_connect(move || drop(tx.send(())));

        let client = Client::new(&server.ws_url(), quiet_config(), hooks).unwrap();

        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        wait_open(&client).await;
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn send_before_open_is_rejected() {
        let server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();

        // The open has not been processed yet.
        let err = client.send(r#"{"raw":true}"#).unwrap_err();
        assert_eq!(err.kind(), Kind::Send);
        assert_eq!(
            err.downcast_ref::<SendFailure>(),
            Some(&SendFailure::NotConnected)
        );
    }

    #[tokio::test]
    async fn rejects_non_websocket_urls() {
        let err = Client::new("http://localhost:1", Config::default(), Hooks::new()).unwrap_err();
        assert_eq!(err.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn reconnects_after_server_close() {
        let mut server = MockWsServer::start().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = Hooks::new().on_reconnecting(move |attempt, cause| {
            let code = match cause {
                Disconnect::Close(close) => Some(close.code),
                _ => None,
            };
            drop(tx.send((attempt, code)));
        });

        let client = Client::new(&server.ws_url(), quiet_config(), hooks).unwrap();
        wait_open(&client).await;
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));

        server.close_all(1001);

        let (attempt, code) = timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempt, 1);
        assert_eq!(code, Some(1001));
        assert_eq!(server.accepted(Duration::from_secs(3)).await, Some(2));
        wait_open(&client).await;
    }

    #[tokio::test]
    async fn normal_close_from_server_is_terminal() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();
        wait_open(&client).await;
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));

        server.close_all(1000);

        // Longer than the retry delay plus the maximum jitter.
        assert_eq!(server.accepted(Duration::from_millis(1500)).await, None);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn overflows_when_attempts_are_exhausted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = Hooks::new().on_overflow(move |cause| drop(tx.send(format!("{cause:?}"))));
        let config = Config::builder()
            .reconnect(
                ReconnectConfig::builder()
                    .max_attempts(1)
                    .delay(Duration::from_millis(10))
                    .build(),
            )
            .heartbeat(HeartbeatConfig::builder().disabled(true).build())
            .build();

        let client = Client::new(&format!("ws://{addr}"), config, hooks).unwrap();

        let cause = timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(cause.starts_with("Error"), "unexpected cause {cause}");

        let mut state = client.state_receiver();
        timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ConnectionState::Overflow),
        )
        .await
        .unwrap()
        .unwrap();

        // Overflow fires once.
        assert!(
            timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn close_stops_reconnecting() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();
        wait_open(&client).await;
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));

        client.close(Some(4000), Some("bye")).unwrap();

        assert_eq!(server.recv_close().await, Some(Some(4000)));
        assert_eq!(server.accepted(Duration::from_millis(1500)).await, None);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn start_after_close_reconnects() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();
        wait_open(&client).await;

        client.close(None, None).unwrap();
        assert_eq!(server.recv_close().await, Some(Some(1000)));

        client.start().unwrap();
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(2));
        wait_open(&client).await;
    }

    #[tokio::test]
    async fn follows_reachability_signals() {
        let mut server = MockWsServer::start().await;
        let (signals_tx, signals_rx) = futures::channel::mpsc::unbounded();

        let client =
            Client::with_reachability(&server.ws_url(), quiet_config(), Hooks::new(), signals_rx)
                .unwrap();
        wait_open(&client).await;
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(1));

        signals_tx.unbounded_send(Reachability::Unreachable).unwrap();
        assert_eq!(server.recv_close().await, Some(Some(1011)));

        signals_tx.unbounded_send(Reachability::Reachable).unwrap();
        assert_eq!(server.accepted(Duration::from_secs(2)).await, Some(2));
        wait_open(&client).await;
    }

    #[tokio::test]
    async fn shutdown_closes_the_connection() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();
        wait_open(&client).await;

        client.shutdown();

        assert_eq!(server.recv_close().await, Some(Some(1000)));
        assert!(!client.is_connected());
    }
}

mod heartbeat {
    use super::*;

    fn heartbeat_config(interval: Duration, pong_timeout: Duration) -> Config {
        Config::builder()
            .reconnect(ReconnectConfig::builder().max_attempts(0).build())
            .heartbeat(
                HeartbeatConfig::builder()
                    .interval(interval)
                    .pong_timeout(pong_timeout)
                    .build(),
            )
            .build()
    }

    #[tokio::test]
    async fn sends_ping_after_silence() {
        let mut server = MockWsServer::start().await;
        let config = heartbeat_config(Duration::from_millis(100), Duration::from_secs(5));
        let client = Client::new(&server.ws_url(), config, Hooks::new()).unwrap();
        wait_open(&client).await;

        let ping = server.recv_action("ping").await.unwrap();
        assert_eq!(ping["payload"], Value::Null);
    }

    #[tokio::test]
    async fn silent_server_is_force_closed() {
        let mut server = MockWsServer::start().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hooks = Hooks::new().on_overflow(move |_| drop(tx.send(())));
        let config = heartbeat_config(Duration::from_millis(100), Duration::from_millis(300));

        let client = Client::new(&server.ws_url(), config, hooks).unwrap();
        wait_open(&client).await;

        assert_eq!(server.recv_close().await, Some(Some(1013)));
        // Zero attempts allowed, so the heartbeat failure overflows.
        timeout(Duration::from_secs(7), rx.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn traffic_keeps_connection_alive() {
        let mut server = MockWsServer::start().await;
        let config = heartbeat_config(Duration::from_millis(100), Duration::from_millis(200));
        let client = Client::new(&server.ws_url(), config, Hooks::new()).unwrap();
        wait_open(&client).await;

        for _ in 0..12 {
            server.send(&json!({ "action": "tick" }));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(client.state().is_open());
        while let Ok(inbound) = server.inbound_rx.try_recv() {
            assert_ne!(inbound, Inbound::Closed(Some(1013)));
        }
    }
}

mod envelopes {
    use super::*;

    #[tokio::test]
    async fn dispatches_to_registered_listeners() {
        let server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        client
            .on("greet", move |payload| drop(tx.send(payload.cloned())))
            .unwrap();
        wait_open(&client).await;

        server.send(&json!({ "action": "other", "payload": 0 }));
        server.send(&json!({ "action": "greet", "payload": { "n": 1 } }));

        let payload = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, Some(json!({ "n": 1 })));
    }

    #[tokio::test]
    async fn emit_attaches_metadata() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .heartbeat(HeartbeatConfig::builder().disabled(true).build())
            .metadata(json!({ "session": "a" }))
            .build();
        let client = Client::new(&server.ws_url(), config, Hooks::new()).unwrap();
        wait_open(&client).await;

        client.emit("hello", Some(json!({ "k": 1 }))).unwrap();
        let first = server.recv_action("hello").await.unwrap();
        assert_eq!(
            first,
            json!({ "action": "hello", "payload": { "k": 1 }, "metadata": { "session": "a" } })
        );

        client.set_metadata(json!({ "session": "b" })).unwrap();
        client.emit("hello", None).unwrap();
        let second = server.recv_action("hello").await.unwrap();
        assert_eq!(second["metadata"], json!({ "session": "b" }));
        assert_eq!(second["payload"], Value::Null);
    }

    #[tokio::test]
    async fn emit_rejects_empty_action() {
        let server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();

        let err = client.emit("", None).unwrap_err();
        assert_eq!(
            err.downcast_ref::<SendFailure>(),
            Some(&SendFailure::EmptyAction)
        );
    }

    #[tokio::test]
    async fn acknowledges_dispatched_events() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .heartbeat(HeartbeatConfig::builder().disabled(true).build())
            .enable_acknowledge(true)
            .build();
        let client = Client::new(&server.ws_url(), config, Hooks::new()).unwrap();
        client.on("greet", |_| ()).unwrap();
        wait_open(&client).await;

        server.send(&json!({ "action": "greet" }));

        let ack = server.recv_action("ack").await.unwrap();
        assert_eq!(ack["payload"], json!({ "received": "greet" }));
    }

    #[tokio::test]
    async fn send_json_writes_raw_text() {
        let mut server = MockWsServer::start().await;
        let client = Client::new(&server.ws_url(), quiet_config(), Hooks::new()).unwrap();
        wait_open(&client).await;

        client
            .send_json(&json!({ "action": "raw", "extra": true }))
            .unwrap();

        let raw = server.recv_action("raw").await.unwrap();
        assert_eq!(raw, json!({ "action": "raw", "extra": true }));
    }
}

mod stalls {
    use super::*;

    /// Server that completes the opening handshake and then never reads again.
    async fn start_stalled_server() -> (SocketAddr, mpsc::UnboundedReceiver<usize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut held = Vec::new();
            let mut count = 0;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                count += 1;
                drop(accepted_tx.send(count));
                held.push(ws_stream);
            }
        });

        (addr, accepted_rx)
    }

    #[tokio::test]
    async fn stalled_peer_is_force_closed_and_replaced() {
        let (addr, mut accepted) = start_stalled_server().await;
        let (tx, mut closes) = mpsc::unbounded_channel();
        let hooks = Hooks::new().on_close(move |close| drop(tx.send(close.clone())));
        let config = Config::builder()
            .reconnect(
                ReconnectConfig::builder()
                    .delay(Duration::from_millis(100))
                    .build(),
            )
            .heartbeat(
                HeartbeatConfig::builder()
                    .interval(Duration::from_millis(100))
                    .pong_timeout(Duration::from_millis(500))
                    .build(),
            )
            .build();

        let client = Client::new(&format!("ws://{addr}"), config, hooks).unwrap();
        wait_open(&client).await;
        assert_eq!(
            timeout(Duration::from_secs(2), accepted.recv()).await.unwrap(),
            Some(1)
        );

        // Far more than the socket buffers hold, so the writer blocks.
        for _ in 0..64 {
            client.send(vec![0_u8; 1 << 20]).unwrap();
        }

        let close = timeout(Duration::from_secs(10), closes.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close.code, 1013);
        assert!(!close.was_clean);

        assert_eq!(
            timeout(Duration::from_secs(3), accepted.recv()).await.unwrap(),
            Some(2)
        );
    }

    #[tokio::test]
    async fn panicking_hook_does_not_stop_the_client() {
        let mut server = MockWsServer::start().await;
        let hooks = Hooks::new().on_connect(|| panic!("connect hook failed"));

        let client = Client::new(&server.ws_url(), quiet_config(), hooks).unwrap();
        wait_open(&client).await;

        client.emit("after", None).unwrap();
        assert!(server.recv_action("after").await.is_some());
        assert!(client.is_connected());
    }
}
