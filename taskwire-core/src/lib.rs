//! Core types and codec for taskwire
//!
//! taskwire multiplexes task requests and streaming chat exchanges over one
//! persistent WebSocket. This crate holds everything that does not depend on
//! the transport:
//!
//! - **Types**: the `{type, data}` envelope and the typed payloads of every
//!   known message type
//! - **Codec**: text frame encoding and decoding
//! - **Error handling**: the shared error enum and the backend `Problem` shape
//! - **Observability**: tracing subscriber and OpenTelemetry setup
//!
//! # Example
//!
//! ```rust
//! use taskwire_core::{codec, Inbound, Problem};
//!
//! let frame = r#"{"type":"task.error","data":{"task_id":"t1","error":{"title":"boom"}}}"#;
//! match codec::decode_inbound(frame).unwrap() {
//!     Some(Inbound::TaskError(err)) => assert_eq!(err.error, Problem::new("boom")),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Problem, Result};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{
    message_type, validate_message_type, ChatError, ChatMessage, ChatRequest, ChatResponse,
    Envelope, Inbound, Outbound, TaskError, TaskRequest, TaskResult,
};
