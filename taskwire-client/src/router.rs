//! Routing of inbound envelopes by message type
//!
//! Each message type has at most one handler. Registering a handler for a
//! type that already has one replaces it; handlers do not stack. Envelopes
//! whose type has no handler are logged and dropped.
//!
//! Handlers are async and awaited one at a time by the connection task, so
//! they see envelopes in the order the frames arrived.
//!
//! # Examples
//!
//! ```rust,no_run
//! use taskwire_client::MessageRouter;
//!
//! # async fn example(router: &MessageRouter) {
//! router.register("dataset.changed", |data| async move {
//!     println!("new generation: {}", data["generation_id"]);
//! }).await;
//! # }
//! ```

use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use taskwire_core::Envelope;
use tokio::sync::RwLock;

/// Boxed async handler receiving an envelope's `data`
pub type HandlerFn = Arc<dyn Fn(Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Message type to handler table
#[derive(Clone)]
pub struct MessageRouter {
    handlers: Arc<RwLock<HashMap<String, HandlerFn>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for `kind`, replacing any existing handler
    ///
    /// Returns `true` if a previous handler was replaced.
    pub async fn register<F, Fut>(&self, kind: impl Into<String>, handler: F) -> bool
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kind = kind.into();
        let handler: HandlerFn = Arc::new(move |data| Box::pin(handler(data)));
        let replaced = self.handlers.write().await.insert(kind.clone(), handler).is_some();
        if replaced {
            tracing::debug!(kind = %kind, "Replaced message handler");
        }
        replaced
    }

    /// Route an envelope to its handler
    ///
    /// Returns `false` if no handler is registered for its type.
    pub async fn dispatch(&self, envelope: Envelope) -> bool {
        let handler = self.handlers.read().await.get(&envelope.kind).cloned();

        match handler {
            Some(handler) => {
                handler(envelope.data).await;
                true
            }
            None => {
                tracing::debug!(kind = %envelope.kind, "No handler registered for message type");
                false
            }
        }
    }

    pub async fn has_handler(&self, kind: &str) -> bool {
        self.handlers.read().await.contains_key(kind)
    }

    /// Remove the handler for `kind`
    pub async fn unregister(&self, kind: &str) -> bool {
        self.handlers.write().await.remove(kind).is_some()
    }

    /// Message types that currently have a handler
    pub async fn types(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
