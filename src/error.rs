use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Error related to an invalid configuration or argument
    Validation,
    /// Error raised by the underlying transport (open, I/O or liveness failure)
    Transport,
    /// Inbound frame could not be decoded into an envelope
    Envelope,
    /// Outbound frame could not be sent
    Send,
    /// Internal error from dependencies
    Internal,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    #[must_use]
    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    pub fn malformed<S: Into<String>>(reason: S) -> Self {
        MalformedEnvelope {
            reason: reason.into(),
        }
        .into()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

/// An inbound frame that is not a well-formed `{action, payload, metadata}` record.
#[non_exhaustive]
#[derive(Debug)]
pub struct MalformedEnvelope {
    pub reason: String,
}

impl fmt::Display for MalformedEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed envelope: {}", self.reason)
    }
}

impl StdError for MalformedEnvelope {}

/// Reasons an outbound frame was not handed to the transport.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// There is no open transport to send on
    NotConnected,
    /// `emit` was called with an empty action name
    EmptyAction,
    /// The transport refused the frame
    Rejected(String),
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "transport is not open"),
            Self::EmptyAction => write!(f, "action name must not be empty"),
            Self::Rejected(reason) => write!(f, "transport rejected frame: {reason}"),
        }
    }
}

impl StdError for SendFailure {}

/// Failures reported by a transport handle through its error callback.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection could not be established
    Open(String),
    /// The established connection failed while reading or writing
    Protocol(String),
    /// No inbound traffic arrived within the pong timeout
    HeartbeatTimeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(reason) => write!(f, "failed to open connection: {reason}"),
            Self::Protocol(reason) => write!(f, "connection failed: {reason}"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timed out"),
        }
    }
}

impl StdError for TransportError {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<MalformedEnvelope> for Error {
    fn from(err: MalformedEnvelope) -> Self {
        Error::with_source(Kind::Envelope, err)
    }
}

impl From<SendFailure> for Error {
    fn from(err: SendFailure) -> Self {
        Error::with_source(Kind::Send, err)
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::with_source(Kind::Transport, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}
