//! Bounded buffer for frames sent while the socket is down
//!
//! Frames are kept in send order. Once the queue is full, each new frame
//! evicts the oldest one, so a long outage keeps only the most recent
//! intent. The connection task drains the queue in order as soon as a new
//! connection opens.

use std::collections::VecDeque;

/// Default number of frames held while disconnected
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// FIFO of serialized frames with drop-oldest overflow
#[derive(Debug)]
pub struct OutgoingQueue {
    frames: VecDeque<String>,
    capacity: usize,
    evicted: u64,
}

impl OutgoingQueue {
    /// Create a queue with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a queue holding at most `capacity` frames (at least one)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append a frame, returning the evicted frame if the queue was full
    pub fn push(&mut self, frame: String) -> Option<String> {
        let evicted = if self.frames.len() >= self.capacity {
            self.evicted += 1;
            self.frames.pop_front()
        } else {
            None
        };
        self.frames.push_back(frame);
        evicted
    }

    /// Remove and return every frame in send order
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.frames.drain(..)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total frames dropped to make room since creation
    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }

    /// Queued frames, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.frames.iter()
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new()
    }
}
