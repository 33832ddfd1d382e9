//! The `{action, payload, metadata}` message envelope and its JSON codec.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Result;
use crate::error::Error;
use crate::transport::Frame;

/// Action sent by the heartbeat.
pub const PING_ACTION: &str = "ping";
/// Action used to acknowledge a dispatched envelope.
pub const ACK_ACTION: &str = "ack";

/// A decoded inbound envelope.
///
/// `payload` and `metadata` are `None` both when the field is absent and when it is
/// `null`; any other JSON value, including `false`, `0` and `""`, is carried as is.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Borrowed form used for encoding, so outbound payloads are never cloned.
#[derive(Serialize)]
struct EnvelopeRef<'a> {
    action: &'a str,
    payload: Option<&'a Value>,
    metadata: Option<&'a Value>,
}

/// Encode an envelope as a single JSON text record.
///
/// Absent payload and metadata are written as `null`.
pub fn encode(action: &str, payload: Option<&Value>, metadata: Option<&Value>) -> Result<String> {
    let envelope = EnvelopeRef {
        action,
        payload,
        metadata,
    };

    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a frame into an [`Envelope`].
///
/// Fails with [`MalformedEnvelope`](crate::error::MalformedEnvelope) when the frame is not
/// JSON, is not an object, or lacks a non-empty `action`.
pub fn decode(frame: &Frame) -> Result<Envelope> {
    let parsed = match frame {
        Frame::Text(text) => serde_json::from_str::<Envelope>(text),
        Frame::Binary(bytes) => serde_json::from_slice::<Envelope>(bytes),
    };

    let envelope = parsed.map_err(|e| Error::malformed(e.to_string()))?;
    if envelope.action.is_empty() {
        return Err(Error::malformed("action must not be empty"));
    }

    Ok(envelope)
}

/// Payload of the `ack` envelope sent for a dispatched `action`.
#[must_use]
pub fn acknowledgement(action: &str) -> Value {
    json!({ "received": action })
}
