//! taskwire - tasks and chat over one reconnecting WebSocket
//!
//! This is the convenience crate that re-exports the taskwire sub-crates.
//! Use it if you want a single dependency.
//!
//! # Architecture
//!
//! - **taskwire-core**: envelope and payload types, codec, errors, observability
//! - **taskwire-client**: the socket service with queuing, reconnection,
//!   routing, single-shot tasks and streamed chat
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use taskwire::ServiceBuilder;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ServiceBuilder::from_page_url("http://localhost:5000/")?
//!         .connect()
//!         .await?;
//!
//!     let counts: Value = service
//!         .run("value_counts", "widget-1", json!({"column": "country"}))
//!         .await?;
//!     println!("{}", counts);
//!
//!     service.close().await;
//!     Ok(())
//! }
//! ```

pub use taskwire_client as client;
pub use taskwire_core as core;

// Convenience re-exports of the most commonly used types
pub use taskwire_client::{ServiceBuilder, SocketService};
pub use taskwire_core::{Envelope, Error, Problem, Result};
