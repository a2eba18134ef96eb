//! Multiplexed task and chat client over a reconnecting WebSocket
//!
//! A single [`SocketService`] carries every exchange between a data-explorer
//! frontend and its backend:
//!
//! - **Connection management**: one persistent socket, reconnected after a
//!   fixed 500 ms by default, with a bounded drop-oldest queue for frames
//!   sent while it is down
//! - **Message routing**: one async handler per message type, last
//!   registration wins
//! - **Request dispatch**: `run` for single-shot tasks, `stream` for chat
//!   replies delivered chunk by chunk
//! - **Observability**: tracing spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use serde_json::{json, Value};
//! use taskwire_client::ServiceBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ServiceBuilder::from_page_url("http://localhost:5000/")?
//!         .connect()
//!         .await?;
//!
//!     let stats: Value = service
//!         .run("column_stats", "widget-1", json!({"column": "price"}))
//!         .await?;
//!     println!("{}", stats);
//!
//!     service
//!         .on_message("dataset.changed", |data| async move {
//!             println!("dataset changed: {}", data);
//!         })
//!         .await?;
//!
//!     let mut reply = service.stream("Summarize the price column").await?;
//!     while let Some(message) = reply.next().await {
//!         print!("{}", message?.content);
//!     }
//!
//!     service.close().await;
//!     Ok(())
//! }
//! ```

mod connection_state;
mod endpoint;
mod metrics;
mod queue;
mod reconnect;
mod request;
mod router;
mod service;
mod service_builder;

pub use connection_state::{ConnectionManager, ConnectionState};
pub use endpoint::{socket_url, SOCKET_PATH};
pub use metrics::ClientMetrics;
pub use queue::{OutgoingQueue, DEFAULT_QUEUE_CAPACITY};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectionStrategy, DEFAULT_RECONNECT_DELAY};
pub use request::{PendingGuard, RequestManager};
pub use router::{HandlerFn, MessageRouter};
pub use service::{ChatStream, SocketService};
pub use service_builder::ServiceBuilder;
