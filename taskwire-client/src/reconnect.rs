//! Reconnection strategies
//!
//! After the socket closes, the connection task asks its strategy how long
//! to wait before the next attempt, or whether to give up. Strategies are
//! reset each time a connection opens.
//!
//! - **FixedDelay**: the same delay every time; the default is 500 ms with
//!   no attempt limit, so the service retries for its whole lifetime
//! - **ExponentialBackoff**: doubling delays between a floor and a ceiling,
//!   with optional jitter and attempt cap
//!
//! # Examples
//!
//! ```rust
//! use taskwire_client::{ExponentialBackoff, FixedDelay, ReconnectionStrategy};
//! use std::time::Duration;
//!
//! let mut fixed = FixedDelay::default();
//! assert_eq!(fixed.next_delay(1_000), Some(Duration::from_millis(500)));
//!
//! let backoff = ExponentialBackoff::new(Duration::from_millis(250), Duration::from_secs(10))
//!     .with_max_attempts(20)
//!     .with_jitter();
//! ```

use std::time::Duration;

/// Delay used by [`FixedDelay::default`]
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Decides when to retry a lost connection
pub trait ReconnectionStrategy: Send + Sync {
    /// Delay before attempt number `attempt` (0-indexed since the last open),
    /// or `None` to stop reconnecting
    fn next_delay(&mut self, attempt: u32) -> Option<Duration>;

    /// Called after a connection opens
    fn reset(&mut self);
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Retry after `delay` every time, with no attempt limit
    ///
    /// # Arguments
    ///
    /// * `delay` - Wait between a close and the next connection attempt
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_client::{FixedDelay, ReconnectionStrategy};
    /// use std::time::Duration;
    ///
    /// let mut strategy = FixedDelay::new(Duration::from_secs(2));
    /// assert_eq!(strategy.next_delay(7), Some(Duration::from_secs(2)));
    /// ```
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` consecutive failures
    ///
    /// The count restarts each time a connection opens. Once the limit is
    /// reached the service moves to `Failed`.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// The configured wait between attempts
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectionStrategy for FixedDelay {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt >= max => None,
            _ => Some(self.delay),
        }
    }

    fn reset(&mut self) {}
}

/// Exponential backoff with optional jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: Option<u32>,
    jitter: bool,
}

impl ExponentialBackoff {
    /// Backoff starting at `min_delay` and doubling up to `max_delay`
    ///
    /// # Arguments
    ///
    /// * `min_delay` - Delay before the first attempt after a close
    /// * `max_delay` - Ceiling for the doubled delay
    ///
    /// # Examples
    ///
    /// ```rust
    /// use taskwire_client::{ExponentialBackoff, ReconnectionStrategy};
    /// use std::time::Duration;
    ///
    /// let mut strategy =
    ///     ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
    /// assert_eq!(strategy.next_delay(0), Some(Duration::from_millis(100)));
    /// assert_eq!(strategy.next_delay(3), Some(Duration::from_millis(800)));
    /// assert_eq!(strategy.next_delay(9), Some(Duration::from_secs(1)));
    /// ```
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            max_attempts: None,
            jitter: false,
        }
    }

    /// Give up after `max_attempts` consecutive failures
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Add a random 0-25% to every delay
    ///
    /// Spreads out reconnects from many clients dropped at the same moment.
    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }
}

impl ReconnectionStrategy for ExponentialBackoff {
    fn next_delay(&mut self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }

        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let delay = 2u64
            .checked_pow(attempt)
            .and_then(|factor| min_ms.checked_mul(factor))
            .map_or(max_ms, |d| d.min(max_ms));

        if self.jitter && delay > 0 {
            use rand::Rng;
            let jitter_ms = rand::thread_rng().gen_range(0..=(delay / 4));
            return Some(Duration::from_millis(delay + jitter_ms));
        }

        Some(Duration::from_millis(delay))
    }

    fn reset(&mut self) {}
}
