//! Wire types for the taskwire protocol
//!
//! Every socket frame is a JSON [`Envelope`]:
//!
//! ```text
//! { "type": "<namespace>.<verb>", "data": <payload> }
//! ```
//!
//! The transport treats `data` as opaque. Message types this crate knows
//! about get typed payload structs and are grouped into two closed sum types:
//!
//! - [`Outbound`]: what the client sends (`task`, `chat`)
//! - [`Inbound`]: what the client understands (`error`, `task.result`,
//!   `task.error`, `chat.response`, `chat.error`)
//!
//! Payloads are validated when an envelope is decoded into one of these, not
//! when the envelope itself is parsed, so unknown types can still be routed
//! by their type string.

use crate::error::{Error, Problem, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type names used on the wire
pub mod message_type {
    /// Ambient backend error, not tied to a request
    pub const ERROR: &str = "error";
    /// Outbound task request
    pub const TASK: &str = "task";
    /// Successful task reply
    pub const TASK_RESULT: &str = "task.result";
    /// Failed task reply
    pub const TASK_ERROR: &str = "task.error";
    /// Outbound chat message
    pub const CHAT: &str = "chat";
    /// One chunk of a chat reply
    pub const CHAT_RESPONSE: &str = "chat.response";
    /// Failed chat exchange
    pub const CHAT_ERROR: &str = "chat.error";
}

/// Check that `kind` is a non-empty, dot-namespaced identifier
///
/// Segments are separated by `.` and may contain ASCII alphanumerics, `_`
/// and `-`. Empty segments (`"task."`, `".x"`, `"a..b"`) are rejected.
pub fn validate_message_type(kind: &str) -> Result<()> {
    if kind.is_empty() {
        return Err(Error::InvalidEnvelope("message type is empty".to_string()));
    }

    for segment in kind.split('.') {
        if segment.is_empty() {
            return Err(Error::InvalidEnvelope(format!(
                "message type '{}' has an empty segment",
                kind
            )));
        }
        if let Some(c) = segment
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(Error::InvalidEnvelope(format!(
                "message type '{}' contains invalid character {:?}",
                kind, c
            )));
        }
    }

    Ok(())
}

/// A single frame on the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope")]
pub struct Envelope {
    /// Dot-namespaced message type
    #[serde(rename = "type")]
    pub kind: String,

    /// Payload, interpreted only by the handler for `kind`
    pub data: Value,
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = Error;

    fn try_from(raw: RawEnvelope) -> Result<Self> {
        Envelope::new(raw.kind, raw.data)
    }
}

impl Envelope {
    /// Create an envelope, validating the message type
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_core::Envelope;
    /// use serde_json::json;
    ///
    /// let envelope = Envelope::new("selection.changed", json!({"rows": [1, 2]})).unwrap();
    /// assert_eq!(envelope.kind, "selection.changed");
    ///
    /// assert!(Envelope::new("", json!(null)).is_err());
    /// ```
    pub fn new(kind: impl Into<String>, data: Value) -> Result<Self> {
        let kind = kind.into();
        validate_message_type(&kind)?;
        Ok(Self { kind, data })
    }

    /// Create an envelope from any serializable payload
    pub fn with_payload<T: Serialize>(kind: impl Into<String>, payload: &T) -> Result<Self> {
        Self::new(kind, serde_json::to_value(payload)?)
    }

    /// Decode the payload into a concrete type
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Outbound `task` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Name of the backend task to execute
    pub task: String,
    /// The widget that issued the request
    pub widget_id: String,
    /// Correlation id
    pub task_id: String,
    /// Dataset generation the request was issued against
    pub generation_id: i64,
    /// Task arguments
    pub args: Value,
}

/// Outbound `chat` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Correlation id shared by every chunk of the reply
    pub chat_id: String,
    /// The user's message
    pub message: String,
}

/// Inbound `task.result` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    #[serde(default)]
    pub result: Value,
}

/// Inbound `task.error` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub task_id: String,
    pub error: Problem,
}

/// A message carried by a chat reply chunk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

/// Inbound `chat.response` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub chat_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatMessage>,
    /// Set on the final chunk of an exchange
    #[serde(default)]
    pub done: bool,
}

/// Inbound `chat.error` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatError {
    pub chat_id: String,
    pub error: Problem,
}

/// Messages the client sends
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Task(TaskRequest),
    Chat(ChatRequest),
}

impl Outbound {
    /// Wire type of this message
    pub fn kind(&self) -> &'static str {
        match self {
            Outbound::Task(_) => message_type::TASK,
            Outbound::Chat(_) => message_type::CHAT,
        }
    }

    /// Correlation id carried by this message
    pub fn correlation_id(&self) -> &str {
        match self {
            Outbound::Task(req) => &req.task_id,
            Outbound::Chat(req) => &req.chat_id,
        }
    }

    /// Wrap the payload in an envelope
    pub fn into_envelope(self) -> Result<Envelope> {
        let kind = self.kind();
        let data = match self {
            Outbound::Task(req) => serde_json::to_value(req)?,
            Outbound::Chat(req) => serde_json::to_value(req)?,
        };
        Envelope::new(kind, data)
    }
}

/// Messages the client understands
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Ambient `error` not tied to a request
    Problem(Problem),
    TaskResult(TaskResult),
    TaskError(TaskError),
    ChatResponse(ChatResponse),
    ChatError(ChatError),
}

impl Inbound {
    /// Decode a payload for a known message type
    ///
    /// Returns `Ok(None)` when `kind` is not one of the known inbound types,
    /// and an error when it is known but `data` has the wrong shape.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_core::{Inbound, message_type};
    /// use serde_json::json;
    ///
    /// let msg = Inbound::decode(
    ///     message_type::TASK_RESULT,
    ///     json!({"task_id": "abc", "result": 42}),
    /// ).unwrap();
    /// assert_eq!(msg.unwrap().correlation_id(), Some("abc"));
    ///
    /// assert!(Inbound::decode("selection.changed", json!({})).unwrap().is_none());
    /// ```
    pub fn decode(kind: &str, data: Value) -> Result<Option<Self>> {
        let msg = match kind {
            message_type::ERROR => Inbound::Problem(serde_json::from_value(data)?),
            message_type::TASK_RESULT => Inbound::TaskResult(serde_json::from_value(data)?),
            message_type::TASK_ERROR => Inbound::TaskError(serde_json::from_value(data)?),
            message_type::CHAT_RESPONSE => Inbound::ChatResponse(serde_json::from_value(data)?),
            message_type::CHAT_ERROR => Inbound::ChatError(serde_json::from_value(data)?),
            _ => return Ok(None),
        };
        Ok(Some(msg))
    }

    /// Correlation id, for request-scoped messages
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Inbound::Problem(_) => None,
            Inbound::TaskResult(msg) => Some(&msg.task_id),
            Inbound::TaskError(msg) => Some(&msg.task_id),
            Inbound::ChatResponse(msg) => Some(&msg.chat_id),
            Inbound::ChatError(msg) => Some(&msg.chat_id),
        }
    }
}

impl TryFrom<Envelope> for Inbound {
    type Error = Error;

    fn try_from(envelope: Envelope) -> Result<Self> {
        let kind = envelope.kind;
        Inbound::decode(&kind, envelope.data)?
            .ok_or_else(|| Error::InvalidEnvelope(format!("unknown inbound type '{}'", kind)))
    }
}
