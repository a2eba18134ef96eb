//! Codec for envelope frames
//!
//! Converts between socket text frames and [`Envelope`]s. Decoding is two
//! steps: the frame must be valid JSON, and it must be an object with a
//! valid `type`. The two failures map to different errors so a caller can
//! tell a garbled frame from a frame the protocol does not allow.
//!
//! # Examples
//!
//! ```rust
//! use taskwire_core::{codec, Envelope};
//! use serde_json::json;
//!
//! let envelope = Envelope::new("task.result", json!({"task_id": "1", "result": 2})).unwrap();
//! let text = codec::encode(&envelope).unwrap();
//!
//! let decoded = codec::decode(&text).unwrap();
//! assert_eq!(decoded, envelope);
//! ```

use crate::error::{Error, Result};
use crate::types::{Envelope, Inbound, Outbound};

/// Encode an envelope to a text frame
pub fn encode(envelope: &Envelope) -> Result<String> {
    serde_json::to_string(envelope).map_err(|e| Error::Serialization(e.to_string()))
}

/// Encode an outbound message to a text frame
pub fn encode_outbound(message: Outbound) -> Result<String> {
    encode(&message.into_envelope()?)
}

/// Decode a text frame to an envelope
///
/// # Errors
///
/// - `Error::Serialization` if the frame is not JSON
/// - `Error::InvalidEnvelope` if it is JSON but not a valid envelope
pub fn decode(text: &str) -> Result<Envelope> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| Error::Serialization(e.to_string()))?;

    if !value.is_object() {
        return Err(Error::InvalidEnvelope(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    }

    serde_json::from_value(value).map_err(|e| Error::InvalidEnvelope(e.to_string()))
}

/// Decode a text frame straight to a known inbound message
///
/// Returns `Ok(None)` for well-formed envelopes of an unknown type.
pub fn decode_inbound(text: &str) -> Result<Option<Inbound>> {
    let envelope = decode(text)?;
    Inbound::decode(&envelope.kind, envelope.data)
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
