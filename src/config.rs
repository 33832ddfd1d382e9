#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use bon::Builder;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

const DEFAULT_DELAY_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_MAX_DELAY_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(30);
/// Grace added on top of the heartbeat interval when no pong timeout is configured.
const DEFAULT_PONG_GRACE_DURATION: Duration = Duration::from_secs(5);

/// Configuration for a [`Controller`](crate::Controller).
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use resilient_socket::config::{Config, HeartbeatConfig, ReconnectConfig};
///
/// let config = Config::builder()
///     .reconnect(
///         ReconnectConfig::builder()
///             .max_attempts(5)
///             .delay(Duration::from_secs(1))
///             .exponential_factor(2.0)
///             .build(),
///     )
///     .heartbeat(HeartbeatConfig::builder().interval(Duration::from_secs(10)).build())
///     .enable_acknowledge(true)
///     .protocols(vec!["json.v1".to_owned()])
///     .build();
///
/// assert!(config.validate().is_ok());
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct Config {
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Liveness protocol configuration
    #[builder(default)]
    pub heartbeat: HeartbeatConfig,
    /// Initial metadata attached to every outbound envelope
    pub metadata: Option<Value>,
    /// Reply with an `ack` envelope to every dispatched inbound envelope
    #[builder(default)]
    pub enable_acknowledge: bool,
    /// Sub-protocols offered during the opening handshake
    #[builder(default)]
    pub protocols: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// Check the configuration for values the controller cannot honour.
    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        self.heartbeat.validate()?;

        if self.protocols.iter().any(String::is_empty) {
            return Err(Error::validation("sub-protocol names must not be empty"));
        }

        Ok(())
    }
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before overflowing.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Base delay between reconnection attempts
    #[builder(default = DEFAULT_DELAY_DURATION)]
    pub delay: Duration,
    /// Multiplier applied per attempt; `0.0` disables exponential growth
    #[builder(default)]
    pub exponential_factor: f64,
    /// Upper bound for exponentially grown delays
    #[builder(default = DEFAULT_MAX_DELAY_DURATION)]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig::builder().build()
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if !self.exponential_factor.is_finite() || self.exponential_factor < 0.0 {
            return Err(Error::validation(format!(
                "exponential factor must be a finite, non-negative number, got {}",
                self.exponential_factor
            )));
        }

        if self.exponential_factor != 0.0 && self.max_delay < self.delay {
            return Err(Error::validation(format!(
                "max delay {:?} is shorter than the base delay {:?}",
                self.max_delay, self.delay
            )));
        }

        Ok(())
    }
}

/// Configuration for the heartbeat liveness protocol.
#[non_exhaustive]
#[derive(Debug, Clone, Builder)]
pub struct HeartbeatConfig {
    /// Disable heartbeats entirely: no pings are sent and no connection is force-closed
    #[builder(default)]
    pub disabled: bool,
    /// Interval of silence after which a `ping` envelope is sent
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub interval: Duration,
    /// Maximum silence before the connection is considered dead.
    /// Defaults to `interval` plus five seconds.
    pub pong_timeout: Option<Duration>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        HeartbeatConfig::builder().build()
    }
}

impl HeartbeatConfig {
    /// The effective pong timeout.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        self.pong_timeout
            .unwrap_or_else(|| self.interval.saturating_add(DEFAULT_PONG_GRACE_DURATION))
    }

    fn validate(&self) -> Result<()> {
        if self.disabled {
            return Ok(());
        }

        if self.interval.is_zero() {
            return Err(Error::validation("heartbeat interval must be non-zero"));
        }

        if self.pong_timeout().is_zero() {
            return Err(Error::validation("pong timeout must be non-zero"));
        }

        Ok(())
    }
}
