//! Correlation of requests with their replies
//!
//! Every outgoing task or chat message carries a fresh UUID. Before the
//! message is sent, an entry is registered under that id:
//!
//! - a **single-shot** entry holds a oneshot sender, completed by the first
//!   matching `task.result` or `task.error`;
//! - a **streaming** entry holds the sending half of an unbounded channel
//!   that stays registered for the whole chat exchange and is removed by the
//!   `done` chunk or a `chat.error`.
//!
//! Delivering to an entry never waits, so a stream nobody is reading cannot
//! hold up replies for other requests on the same socket.
//!
//! Replies for ids with no entry are ignored. A [`PendingGuard`] removes
//! its entry when dropped, which is how timeouts and abandoned streams clean
//! up after themselves.
//!
//! The table lock is a plain mutex that is never held across an await.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use taskwire_core::{ChatResponse, Error, Problem, Result};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Receiver for a single-shot reply
pub type ReplyReceiver = oneshot::Receiver<Result<Value>>;

/// Receiver for the chunks of a streamed reply
pub type ChunkReceiver = mpsc::UnboundedReceiver<Result<ChatResponse>>;

enum PendingRequest {
    Once(oneshot::Sender<Result<Value>>),
    Stream(mpsc::UnboundedSender<Result<ChatResponse>>),
}

/// Table of requests awaiting replies
#[derive(Clone, Default)]
pub struct RequestManager {
    pending: Arc<Mutex<HashMap<String, PendingRequest>>>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a new correlation id
    pub fn next_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a single-shot request
    pub fn register(&self, id: impl Into<String>) -> ReplyReceiver {
        let (tx, rx) = oneshot::channel();
        self.insert(id.into(), PendingRequest::Once(tx));
        rx
    }

    /// Register a streaming request
    pub fn register_stream(&self, id: impl Into<String>) -> ChunkReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.insert(id.into(), PendingRequest::Stream(tx));
        rx
    }

    fn insert(&self, id: String, entry: PendingRequest) {
        if self.table().insert(id.clone(), entry).is_some() {
            tracing::warn!(id = %id, "Replaced an existing pending request");
        }
    }

    /// Guard that removes the entry for `id` when dropped
    pub fn guard(&self, id: impl Into<String>) -> PendingGuard {
        PendingGuard {
            requests: self.clone(),
            id: id.into(),
        }
    }

    /// Settle a single-shot request
    ///
    /// Returns `false` if `id` has no single-shot entry; streaming entries
    /// under the same id are left alone.
    pub fn complete(&self, id: &str, result: Result<Value>) -> bool {
        let mut pending = self.table();
        match pending.remove(id) {
            Some(PendingRequest::Once(tx)) => {
                let _ = tx.send(result);
                true
            }
            Some(other) => {
                pending.insert(id.to_string(), other);
                false
            }
            None => false,
        }
    }

    /// Deliver one chunk to a streaming request
    ///
    /// Never waits on the consumer. A `done` chunk removes the entry. Returns
    /// `false` if there is no streaming entry for the chunk's id or its
    /// consumer has gone away.
    pub fn deliver_chunk(&self, response: ChatResponse) -> bool {
        let id = response.chat_id.clone();
        let mut pending = self.table();
        let sender = match pending.get(&id) {
            Some(PendingRequest::Stream(tx)) => tx,
            _ => return false,
        };
        let done = response.done;

        if sender.send(Ok(response)).is_err() {
            tracing::debug!(chat_id = %id, "Stream consumer gone, discarding chunk");
            pending.remove(&id);
            return false;
        }
        if done {
            pending.remove(&id);
        }
        true
    }

    /// End a streaming request with a backend problem
    pub fn fail_stream(&self, id: &str, problem: Problem) -> bool {
        let mut pending = self.table();
        match pending.remove(id) {
            Some(PendingRequest::Stream(tx)) => tx.send(Err(Error::Problem(problem))).is_ok(),
            Some(other) => {
                pending.insert(id.to_string(), other);
                false
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without settling it
    pub fn remove(&self, id: &str) -> bool {
        self.table().remove(id).is_some()
    }

    /// Fail every pending request with `error`
    pub fn fail_all(&self, error: Error) {
        let drained: Vec<PendingRequest> = self.table().drain().map(|(_, req)| req).collect();
        for req in drained {
            match req {
                PendingRequest::Once(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
                PendingRequest::Stream(tx) => {
                    let _ = tx.send(Err(error.clone()));
                }
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.table().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.table().len()
    }
}

/// Removes a pending entry on drop
pub struct PendingGuard {
    requests: RequestManager,
    id: String,
}

impl PendingGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.requests.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskwire_core::ChatMessage;

    fn chunk(id: &str, content: Option<&str>, done: bool) -> ChatResponse {
        ChatResponse {
            chat_id: id.to_string(),
            message: content.map(|c| ChatMessage {
                content: c.to_string(),
                role: "assistant".to_string(),
                content_type: None,
                done: None,
            }),
            done,
        }
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..1000).map(|_| RequestManager::next_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[tokio::test]
    async fn test_register_and_complete() {
        let manager = RequestManager::new();
        let rx = manager.register("t1");
        assert_eq!(manager.pending_count(), 1);

        assert!(manager.complete("t1", Ok(json!(42))));
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(rx.await.unwrap().unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_complete_only_affects_matching_id() {
        let manager = RequestManager::new();
        let rx1 = manager.register("t1");
        let mut rx2 = manager.register("t2");

        assert!(manager.complete("t1", Ok(json!("one"))));
        assert_eq!(rx1.await.unwrap().unwrap(), json!("one"));

        assert!(manager.contains("t2"));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_unknown_id_is_noop() {
        let manager = RequestManager::new();
        let _rx = manager.register("t1");

        assert!(!manager.complete("never-requested", Ok(json!(1))));
        assert!(manager.contains("t1"));
    }

    #[tokio::test]
    async fn test_complete_with_problem() {
        let manager = RequestManager::new();
        let rx = manager.register("t1");

        manager.complete("t1", Err(Error::Problem(Problem::new("boom"))));
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.problem(), Some(&Problem::new("boom")));
    }

    #[tokio::test]
    async fn test_stream_entry_stays_armed_until_done() {
        let manager = RequestManager::new();
        let mut rx = manager.register_stream("c1");

        assert!(manager.deliver_chunk(chunk("c1", Some("a"), false)));
        assert!(manager.deliver_chunk(chunk("c1", Some("b"), false)));
        assert_eq!(manager.pending_count(), 1);

        assert!(manager.deliver_chunk(chunk("c1", None, true)));
        assert_eq!(manager.pending_count(), 0);

        let mut contents = Vec::new();
        while let Some(item) = rx.recv().await {
            let resp = item.unwrap();
            contents.push(resp.message.map(|m| m.content));
        }
        assert_eq!(contents, vec![Some("a".into()), Some("b".into()), None]);
    }

    #[tokio::test]
    async fn test_unread_stream_buffers_every_chunk() {
        let manager = RequestManager::new();
        let mut rx = manager.register_stream("c1");

        for i in 0..500 {
            assert!(manager.deliver_chunk(chunk("c1", Some(&i.to_string()), false)));
        }
        assert!(manager.deliver_chunk(chunk("c1", None, true)));
        assert!(!manager.contains("c1"));

        let mut received = 0;
        while let Some(item) = rx.recv().await {
            item.unwrap();
            received += 1;
        }
        assert_eq!(received, 501);
    }

    #[tokio::test]
    async fn test_task_result_does_not_settle_stream_entry() {
        let manager = RequestManager::new();
        let _rx = manager.register_stream("c1");

        assert!(!manager.complete("c1", Ok(json!(1))));
        assert!(manager.contains("c1"));
    }

    #[tokio::test]
    async fn test_fail_stream() {
        let manager = RequestManager::new();
        let mut rx = manager.register_stream("c1");

        assert!(manager.fail_stream("c1", Problem::new("model offline")));
        assert!(!manager.contains("c1"));

        let err = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(err.problem().map(|p| p.title.as_str()), Some("model offline"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_chunk_for_dropped_consumer_removes_entry() {
        let manager = RequestManager::new();
        let rx = manager.register_stream("c1");
        drop(rx);

        assert!(!manager.deliver_chunk(chunk("c1", Some("late"), false)));
        assert!(!manager.contains("c1"));
    }

    #[tokio::test]
    async fn test_guard_removes_entry() {
        let manager = RequestManager::new();
        let rx = manager.register("t1");
        {
            let guard = manager.guard("t1");
            assert_eq!(guard.id(), "t1");
        }
        assert!(!manager.contains("t1"));
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let manager = RequestManager::new();
        let rx1 = manager.register("t1");
        let mut rx2 = manager.register_stream("c1");

        manager.fail_all(Error::ConnectionClosed);

        assert_eq!(manager.pending_count(), 0);
        assert!(matches!(rx1.await.unwrap(), Err(Error::ConnectionClosed)));
        assert!(matches!(rx2.recv().await, Some(Err(Error::ConnectionClosed))));
    }
}
