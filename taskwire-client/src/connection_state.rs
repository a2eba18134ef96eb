//! Connection state tracking
//!
//! The connection task is the only writer of this state; everyone else
//! observes it through [`ConnectionManager::subscribe`].
//!
//! # States
//!
//! ```text
//! Idle → Connecting → Open
//!            ↑          ↓
//!            └─────── Closed ──→ Failed   (strategy gave up)
//!
//! any ──→ Shutdown                        (explicit close)
//! ```
//!
//! Transitions are guarded: a second close while already `Closed` is a
//! no-op, and `Connecting` can only be entered from `Idle` or `Closed`. With
//! a single connection task this means every close schedules exactly one
//! reconnect and there is never more than one connection attempt in flight.
//! `Failed` and `Shutdown` are terminal for reconnection, though a
//! `Failed` service can still be shut down.

use crate::reconnect::ReconnectionStrategy;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, connection task not started yet
    Idle,
    /// Handshake in progress
    Connecting,
    /// Socket is live; sends go straight to the writer
    Open,
    /// Socket lost; a reconnect is scheduled
    Closed,
    /// The reconnection strategy gave up
    Failed,
    /// Closed on request; no further reconnects
    Shutdown,
}

impl ConnectionState {
    /// Whether the state can never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Shutdown)
    }

    /// Numeric encoding used by the connection state gauge
    pub fn as_gauge(self) -> i64 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Closed => 3,
            ConnectionState::Failed => 4,
            ConnectionState::Shutdown => 5,
        }
    }
}

/// Owns the connection state and the reconnection strategy
pub struct ConnectionManager {
    state: watch::Sender<ConnectionState>,
    strategy: Mutex<Box<dyn ReconnectionStrategy>>,
    attempt: AtomicU32,
    reconnects: AtomicU64,
}

impl ConnectionManager {
    pub fn new(strategy: Box<dyn ReconnectionStrategy>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            state,
            strategy: Mutex::new(strategy),
            attempt: AtomicU32::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Apply `next` if it yields a different state; returns whether it did
    fn transition(&self, next: impl FnOnce(ConnectionState) -> Option<ConnectionState>) -> bool {
        self.state.send_if_modified(|state| match next(*state) {
            Some(to) if to != *state => {
                tracing::debug!(from = ?*state, to = ?to, "Connection state changed");
                *state = to;
                true
            }
            _ => false,
        })
    }

    /// Enter `Connecting`; refused unless currently `Idle` or `Closed`
    pub fn connecting(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Idle | ConnectionState::Closed => Some(ConnectionState::Connecting),
            _ => None,
        })
    }

    /// Enter `Open` after a successful handshake and reset the strategy
    pub async fn opened(&self) -> bool {
        let changed = self.transition(|state| match state {
            ConnectionState::Connecting => Some(ConnectionState::Open),
            _ => None,
        });
        if changed {
            self.attempt.store(0, Ordering::SeqCst);
            self.strategy.lock().await.reset();
        }
        changed
    }

    /// Enter `Closed`; a no-op unless currently `Connecting` or `Open`
    pub fn closed(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Connecting | ConnectionState::Open => Some(ConnectionState::Closed),
            _ => None,
        })
    }

    /// Enter `Shutdown` from any state except `Shutdown`, `Failed` included
    pub fn shutdown(&self) -> bool {
        self.transition(|state| match state {
            ConnectionState::Shutdown => None,
            _ => Some(ConnectionState::Shutdown),
        })
    }

    /// Delay before the next reconnect, or `None` once the strategy gives up
    ///
    /// Only valid in `Closed`; giving up moves the state to `Failed`.
    pub async fn next_reconnect_delay(&self) -> Option<Duration> {
        if self.state() != ConnectionState::Closed {
            return None;
        }

        let attempt = self.attempt.load(Ordering::SeqCst);
        let delay = self.strategy.lock().await.next_delay(attempt);

        match delay {
            Some(_) => {
                self.attempt.store(attempt.saturating_add(1), Ordering::SeqCst);
                self.reconnects.fetch_add(1, Ordering::SeqCst);
            }
            None => {
                self.transition(|state| match state {
                    ConnectionState::Closed => Some(ConnectionState::Failed),
                    _ => None,
                });
            }
        }

        delay
    }

    /// Consecutive failed attempts since the last open
    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    /// Reconnects scheduled over the manager's lifetime
    pub fn reconnects_scheduled(&self) -> u64 {
        self.reconnects.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::{ExponentialBackoff, FixedDelay};

    fn manager() -> ConnectionManager {
        ConnectionManager::new(Box::new(FixedDelay::default()))
    }

    #[tokio::test]
    async fn test_connection_state_transitions() {
        let manager = manager();
        assert_eq!(manager.state(), ConnectionState::Idle);

        assert!(manager.connecting());
        assert_eq!(manager.state(), ConnectionState::Connecting);

        assert!(manager.opened().await);
        assert_eq!(manager.state(), ConnectionState::Open);

        assert!(manager.closed());
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_repeated_close_schedules_one_reconnect() {
        let manager = manager();
        manager.connecting();
        manager.opened().await;

        for _ in 0..3 {
            assert!(manager.closed());
            // Further close signals for the same loss are ignored
            assert!(!manager.closed());
            assert!(!manager.closed());

            assert_eq!(
                manager.next_reconnect_delay().await,
                Some(Duration::from_millis(500))
            );
            // The delay is only handed out while Closed
            assert!(manager.connecting());
            assert_eq!(manager.next_reconnect_delay().await, None);
            assert_eq!(manager.state(), ConnectionState::Connecting);

            assert!(manager.opened().await);
        }

        assert_eq!(manager.reconnects_scheduled(), 3);
    }

    #[tokio::test]
    async fn test_single_connecting_attempt() {
        let manager = manager();
        assert!(manager.connecting());
        assert!(!manager.connecting());
        assert!(manager.opened().await);
        assert!(!manager.connecting());
    }

    #[tokio::test]
    async fn test_attempts_reset_on_open() {
        let manager = manager();
        manager.connecting();

        for expected in 1..=3 {
            manager.closed();
            manager.next_reconnect_delay().await;
            assert_eq!(manager.attempt(), expected);
            manager.connecting();
        }

        manager.opened().await;
        assert_eq!(manager.attempt(), 0);
    }

    #[tokio::test]
    async fn test_strategy_give_up_is_terminal() {
        let strategy = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1))
            .with_max_attempts(1);
        let manager = ConnectionManager::new(Box::new(strategy));

        manager.connecting();
        manager.closed();
        assert!(manager.next_reconnect_delay().await.is_some());
        manager.connecting();
        manager.closed();
        assert!(manager.next_reconnect_delay().await.is_none());

        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.state().is_terminal());
        assert!(!manager.connecting());
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal() {
        let manager = manager();
        manager.connecting();
        assert!(manager.shutdown());
        assert!(!manager.shutdown());

        assert!(!manager.closed());
        assert!(!manager.connecting());
        assert!(!manager.opened().await);
        assert_eq!(manager.state(), ConnectionState::Shutdown);
    }

    #[tokio::test]
    async fn test_failed_service_can_still_shut_down() {
        let strategy = FixedDelay::new(Duration::from_millis(10)).with_max_attempts(0);
        let manager = ConnectionManager::new(Box::new(strategy));

        manager.connecting();
        manager.closed();
        assert!(manager.next_reconnect_delay().await.is_none());
        assert_eq!(manager.state(), ConnectionState::Failed);

        assert!(manager.shutdown());
        assert_eq!(manager.state(), ConnectionState::Shutdown);
        assert!(!manager.shutdown());
    }

    #[tokio::test]
    async fn test_subscribe_sees_changes() {
        let manager = manager();
        let mut rx = manager.subscribe();

        manager.connecting();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), ConnectionState::Connecting);
    }
}
