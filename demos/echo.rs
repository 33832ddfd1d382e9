//! Resilient connection against an echo server.
//!
//! Every emitted envelope is echoed back and dispatched to the `hello` listener, which
//! keeps the heartbeat satisfied. Stop the server (or the network) to watch reconnects.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=debug cargo run --example echo --features ws,tracing -- wss://echo.websocket.org
//! ```

use std::time::Duration;

use resilient_socket::config::{Config, HeartbeatConfig, ReconnectConfig};
use resilient_socket::ws::Client;
use resilient_socket::{Disconnect, Hooks};
use serde_json::json;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "wss://echo.websocket.org".to_owned());

    let config = Config::builder()
        .reconnect(
            ReconnectConfig::builder()
                .max_attempts(10)
                .delay(Duration::from_secs(1))
                .exponential_factor(2.0)
                .max_delay(Duration::from_secs(20))
                .build(),
        )
        .heartbeat(
            HeartbeatConfig::builder()
                .interval(Duration::from_secs(5))
                .build(),
        )
        .metadata(json!({ "client": "echo-demo" }))
        .build();

    let hooks = Hooks::new()
        .on_connect(|| info!(event = "connect"))
        .on_close(|close| info!(event = "close", code = close.code, reason = %close.reason))
        .on_reconnecting(|attempt, cause| match cause {
            Disconnect::Error(error) => warn!(event = "reconnecting", attempt, %error),
            _ => info!(event = "reconnecting", attempt, cause = ?cause),
        })
        .on_overflow(|_| warn!(event = "overflow", "Giving up"));

    let client = Client::new(&url, config, hooks)?;
    client.on("hello", |payload| info!(listener = "hello", ?payload))?;

    let mut state = client.state_receiver();
    for n in 0..20_u32 {
        if !state.borrow_and_update().is_open() {
            state.changed().await?;
            continue;
        }

        client.emit("hello", Some(json!({ "n": n })))?;
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    client.close(None, Some("Demo finished"))?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    Ok(())
}
