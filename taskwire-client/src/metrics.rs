//! Client metrics definitions
//!
//! OpenTelemetry instruments describing connection health and traffic.
//! They are exported through whatever meter provider
//! [`init_observability`](taskwire_core::init_observability) installed; with
//! no provider the global no-op meter swallows them.
//!
//! # Metrics Collected
//!
//! - **connection.state**: current [`ConnectionState`](crate::ConnectionState) (gauge)
//! - **tasks.total** / **task.duration**: task round trips by task name and status
//! - **errors.total**: errors by kind
//! - **reconnection.attempts** / **reconnection.success**
//! - **frames.queued** / **frames.evicted**: offline queue activity
//! - **chat.chunks.received**: streamed chat chunks
//! - **messages.unrouted**: envelopes with no handler

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    KeyValue,
};

/// Client metrics for monitoring
pub struct ClientMetrics {
    /// Connection state, encoded by `ConnectionState::as_gauge`
    pub connection_state: Gauge<i64>,
    pub tasks_total: Counter<u64>,
    /// Task round trip in seconds
    pub task_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    /// Frames buffered while disconnected
    pub frames_queued: Counter<u64>,
    /// Frames dropped because the offline queue was full
    pub frames_evicted: Counter<u64>,
    pub chat_chunks_received: Counter<u64>,
    pub unrouted_messages: Counter<u64>,
}

impl ClientMetrics {
    pub fn new(service_name: impl Into<String>) -> Self {
        let name: &'static str = Box::leak(service_name.into().into_boxed_str());
        let meter = global::meter(name);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("taskwire.client.connection.state")
                .with_description(
                    "Connection state (0=idle, 1=connecting, 2=open, 3=closed, 4=failed, 5=shutdown)",
                )
                .build(),
            tasks_total: meter
                .u64_counter("taskwire.client.tasks.total")
                .with_description("Total number of tasks run")
                .build(),
            task_duration: meter
                .f64_histogram("taskwire.client.task.duration")
                .with_description("Task round trip in seconds")
                .build(),
            errors_total: meter
                .u64_counter("taskwire.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("taskwire.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("taskwire.client.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
            frames_queued: meter
                .u64_counter("taskwire.client.frames.queued")
                .with_description("Frames buffered while disconnected")
                .build(),
            frames_evicted: meter
                .u64_counter("taskwire.client.frames.evicted")
                .with_description("Queued frames dropped to make room")
                .build(),
            chat_chunks_received: meter
                .u64_counter("taskwire.client.chat.chunks.received")
                .with_description("Streamed chat chunks received")
                .build(),
            unrouted_messages: meter
                .u64_counter("taskwire.client.messages.unrouted")
                .with_description("Inbound messages with no registered handler")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    /// Record a finished task
    pub fn record_task(&self, task: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("task", task.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.tasks_total.add(1, attributes);
        self.task_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, error_type: &str) {
        let attributes = &[KeyValue::new("error_type", error_type.to_string())];
        self.errors_total.add(1, attributes);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_queued(&self) {
        self.frames_queued.add(1, &[]);
    }

    pub fn record_evicted(&self) {
        self.frames_evicted.add(1, &[]);
    }

    pub fn record_chat_chunk(&self) {
        self.chat_chunks_received.add(1, &[]);
    }

    pub fn record_unrouted(&self, kind: &str) {
        let attributes = &[KeyValue::new("type", kind.to_string())];
        self.unrouted_messages.add(1, attributes);
    }
}
