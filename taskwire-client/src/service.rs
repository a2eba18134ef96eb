//! The socket service
//!
//! [`SocketService`] owns one persistent WebSocket and multiplexes every
//! exchange with the backend over it:
//!
//! - **send**: fire-and-forget envelopes, queued while the socket is down
//! - **run**: single-shot task requests matched to `task.result` /
//!   `task.error` by `task_id`
//! - **stream**: chat exchanges delivered as a stream of `chat.response`
//!   chunks matched by `chat_id`
//! - **on_message**: handlers for any other message type
//!
//! # Connection task
//!
//! A background task owns the socket. It connects, drains the offline queue
//! into a fresh writer, reads frames and routes them, and on any loss waits
//! for the reconnection strategy's delay before trying again. Each live
//! connection has a writer task fed by an unbounded channel, so frames go
//! out in the order `send` was called.
//!
//! # Cloning
//!
//! `SocketService` is a cheap handle; clones share the connection, the
//! queue and all pending requests. The connection task holds a clone too, so
//! dropping every user handle does not stop it. Call
//! [`close`](SocketService::close) to stop.

use crate::{
    connection_state::{ConnectionManager, ConnectionState},
    queue::OutgoingQueue,
    request::RequestManager,
    router::MessageRouter,
    ClientMetrics,
};
use async_stream::stream;
use futures::{SinkExt, Stream, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskwire_core::{
    codec, message_type, validate_message_type, ChatMessage, ChatRequest, Envelope, Error,
    Inbound, Outbound, Problem, Result, TaskRequest,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Stream of chat reply messages returned by [`SocketService::stream`]
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatMessage>> + Send>>;

/// Buffered ambient problems per subscriber before the oldest are skipped
pub(crate) const PROBLEM_CHANNEL_CAPACITY: usize = 64;

/// How long a closing session waits for its writer to flush
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Outgoing side of the connection
pub(crate) struct Link {
    /// Feeds the writer task of the live connection, if any
    pub(crate) writer: Option<mpsc::UnboundedSender<String>>,
    /// Frames waiting for the next connection
    pub(crate) queue: OutgoingQueue,
}

impl Link {
    pub(crate) fn new(queue: OutgoingQueue) -> Self {
        Self {
            writer: None,
            queue,
        }
    }
}

/// Multiplexed task and chat service over one WebSocket
#[derive(Clone)]
pub struct SocketService {
    pub(crate) url: String,
    pub(crate) link: Arc<Mutex<Link>>,
    pub(crate) connection: Arc<ConnectionManager>,
    pub(crate) router: MessageRouter,
    pub(crate) requests: RequestManager,
    pub(crate) problems: broadcast::Sender<Problem>,
    pub(crate) generation_id: Arc<AtomicI64>,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) shutdown: Arc<watch::Sender<bool>>,
    pub(crate) metrics: Option<Arc<ClientMetrics>>,
}

impl SocketService {
    /// Endpoint this service connects to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current connection state
    ///
    /// A snapshot; use [`subscribe_state`](Self::subscribe_state) to follow
    /// changes.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Wait until the socket is open
    ///
    /// Fails with `ConnectionClosed` if the service shuts down or gives up
    /// reconnecting first.
    pub async fn wait_until_open(&self) -> Result<()> {
        let mut rx = self.connection.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                ConnectionState::Open => return Ok(()),
                s if s.is_terminal() => return Err(Error::ConnectionClosed),
                _ => {}
            }
            rx.changed().await.map_err(|_| Error::ConnectionClosed)?;
        }
    }

    /// Send an envelope
    ///
    /// Goes straight to the socket when it is open; otherwise the frame is
    /// queued for the next connection, evicting the oldest queued frame if
    /// the queue is full. Only encoding fails, plus `ConnectionClosed` once
    /// the service has stopped.
    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        let frame = codec::encode(envelope)?;
        self.send_text(frame).await
    }

    pub(crate) async fn send_text(&self, frame: String) -> Result<()> {
        let mut link = self.link.lock().await;
        if self.connection.state().is_terminal() {
            return Err(Error::ConnectionClosed);
        }

        let frame = match &link.writer {
            Some(writer) => match writer.send(frame) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(frame)) => frame,
            },
            None => frame,
        };
        // The writer is gone; the connection task has not noticed yet
        link.writer = None;

        if let Some(m) = &self.metrics {
            m.record_queued();
        }
        if link.queue.push(frame).is_some() {
            tracing::warn!(
                capacity = link.queue.capacity(),
                "Outgoing queue full, dropped oldest frame"
            );
            if let Some(m) = &self.metrics {
                m.record_evicted();
            }
        }
        tracing::debug!(queued = link.queue.len(), "Socket not open, frame queued");
        Ok(())
    }

    /// Frames waiting for the next connection
    pub async fn queued_len(&self) -> usize {
        self.link.lock().await.queue.len()
    }

    /// Requests and streams still awaiting replies
    pub fn pending_count(&self) -> usize {
        self.requests.pending_count()
    }

    /// Run a backend task and wait for its result
    ///
    /// Sends a `task` envelope with a fresh `task_id` and the current
    /// generation id. Resolves with the matching `task.result`, decoded into
    /// `R`, or fails with the `Problem` from a matching `task.error`.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use taskwire_client::SocketService;
    /// use serde_json::{json, Value};
    ///
    /// # async fn example(service: SocketService) -> taskwire_core::Result<()> {
    /// let histogram: Value = service
    ///     .run("histogram", "widget-7", json!({"column": "age", "bins": 20}))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, args))]
    pub async fn run<A, R>(&self, task: &str, widget_id: &str, args: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let start = Instant::now();
        let task_id = RequestManager::next_id();
        let request = TaskRequest {
            task: task.to_string(),
            widget_id: widget_id.to_string(),
            task_id: task_id.clone(),
            generation_id: self.generation_id(),
            args: serde_json::to_value(args)?,
        };
        let envelope = Outbound::Task(request).into_envelope()?;

        // Register before sending so a fast reply cannot be missed
        let rx = self.requests.register(task_id.clone());
        let _guard = self.requests.guard(task_id.clone());
        self.send(&envelope).await?;

        tracing::debug!(task_id = %task_id, "Task sent, awaiting result");

        let outcome = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(task_id = %task_id, timeout_ms = limit.as_millis() as u64, "Task timed out");
                    if let Some(m) = &self.metrics {
                        m.record_task(task, "timeout", start.elapsed().as_secs_f64());
                        m.record_error("timeout");
                    }
                    return Err(Error::Timeout);
                }
            },
            None => rx.await,
        };

        // A dropped sender means the entry was discarded without an answer
        let result = outcome.map_err(|_| Error::ConnectionClosed)?;
        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(value) => {
                if let Some(m) = &self.metrics {
                    m.record_task(task, "success", duration);
                }
                tracing::debug!(task_id = %task_id, duration_secs = duration, "Task completed");
                Ok(serde_json::from_value(value)?)
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.record_task(task, "error", duration);
                }
                tracing::debug!(task_id = %task_id, error = %e, "Task failed");
                Err(e)
            }
        }
    }

    /// Send a chat message and stream the reply
    ///
    /// The returned stream yields each chunk's message in arrival order and
    /// ends after the chunk marked `done`. A `chat.error` is yielded as an
    /// error and ends the stream. Dropping the stream early discards the
    /// rest of the reply.
    ///
    /// ```rust,no_run
    /// use futures::StreamExt;
    /// use taskwire_client::SocketService;
    ///
    /// # async fn example(service: SocketService) -> taskwire_core::Result<()> {
    /// let mut reply = service.stream("Which columns have missing values?").await?;
    /// while let Some(message) = reply.next().await {
    ///     print!("{}", message?.content);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    #[tracing::instrument(skip(self, message))]
    pub async fn stream(&self, message: impl Into<String>) -> Result<ChatStream> {
        let chat_id = RequestManager::next_id();
        let envelope = Outbound::Chat(ChatRequest {
            chat_id: chat_id.clone(),
            message: message.into(),
        })
        .into_envelope()?;

        let mut rx = self.requests.register_stream(chat_id.clone());
        let guard = self.requests.guard(chat_id.clone());
        self.send(&envelope).await?;

        tracing::debug!(chat_id = %chat_id, "Chat sent, streaming reply");

        let timeout = self.request_timeout;
        Ok(Box::pin(stream! {
            let _guard = guard;
            loop {
                let next = match timeout {
                    Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => {
                            tracing::warn!(chat_id = %chat_id, "Chat reply timed out");
                            yield Err::<ChatMessage, Error>(Error::Timeout);
                            break;
                        }
                    },
                    None => rx.recv().await,
                };

                match next {
                    Some(Ok(chunk)) => {
                        let done = chunk.done;
                        if let Some(message) = chunk.message {
                            yield Ok::<ChatMessage, Error>(message);
                        }
                        if done {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        yield Err::<ChatMessage, Error>(e);
                        break;
                    }
                    None => {
                        yield Err::<ChatMessage, Error>(Error::ConnectionClosed);
                        break;
                    }
                }
            }
        }))
    }

    /// Register a handler for a message type, replacing any existing one
    ///
    /// Returns whether a previous handler was replaced. Handlers for the
    /// built-in reply types can be replaced too, which disconnects `run` or
    /// `stream` from their replies.
    pub async fn on_message<F, Fut>(&self, kind: impl Into<String>, handler: F) -> Result<bool>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let kind = kind.into();
        validate_message_type(&kind)?;
        Ok(self.router.register(kind, handler).await)
    }

    /// Handler table for inbound message types
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # async fn example(service: taskwire_client::SocketService) {
    /// let router = service.router();
    /// assert!(router.has_handler("task.result").await);
    /// router.unregister("dataset.changed").await;
    /// # }
    /// ```
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Receive ambient `error` messages from the backend
    pub fn subscribe_problems(&self) -> broadcast::Receiver<Problem> {
        self.problems.subscribe()
    }

    /// Generation id attached to subsequent tasks
    pub fn generation_id(&self) -> i64 {
        self.generation_id.load(Ordering::SeqCst)
    }

    /// Replace the generation id sent with later tasks
    ///
    /// Tasks already sent keep the id they went out with.
    pub fn set_generation_id(&self, generation_id: i64) {
        self.generation_id.store(generation_id, Ordering::SeqCst);
    }

    /// Stop the service
    ///
    /// Stops reconnecting, closes the socket with a close frame if open,
    /// discards queued frames and fails every pending request with
    /// `ConnectionClosed`. Later sends fail with `ConnectionClosed`.
    pub async fn close(&self) {
        if !self.connection.shutdown() {
            return;
        }
        tracing::info!(url = %self.url, "Closing service");
        self.record_state();

        {
            let mut link = self.link.lock().await;
            link.queue.clear();
            // Dropping the writer's sender makes it send the close frame
            link.writer = None;
        }
        self.shutdown.send_replace(true);
        self.requests.fail_all(Error::ConnectionClosed);
    }

    fn record_state(&self) {
        if let Some(m) = &self.metrics {
            m.update_connection_state(self.connection.state().as_gauge());
        }
    }

    /// Route the built-in reply types to the request table
    pub(crate) async fn register_builtin_handlers(&self) {
        let context = InboundContext {
            requests: self.requests.clone(),
            problems: self.problems.clone(),
            metrics: self.metrics.clone(),
        };

        for kind in [
            message_type::ERROR,
            message_type::TASK_RESULT,
            message_type::TASK_ERROR,
            message_type::CHAT_RESPONSE,
            message_type::CHAT_ERROR,
        ] {
            let context = context.clone();
            self.router
                .register(kind, move |data| {
                    let context = context.clone();
                    async move { context.handle(kind, data).await }
                })
                .await;
        }
    }

    /// Connect, serve, and reconnect until shut down or abandoned
    pub(crate) async fn run_connection(self, mut shutdown: watch::Receiver<bool>) {
        let mut opened_before = false;

        loop {
            if *shutdown.borrow() || !self.connection.connecting() {
                break;
            }
            self.record_state();
            tracing::info!(url = %self.url, attempt = self.connection.attempt(), "Connecting");

            let attempt = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = shutdown.changed() => break,
            };

            match attempt {
                Ok((socket, _)) => {
                    if opened_before {
                        if let Some(m) = &self.metrics {
                            m.record_reconnection_success();
                        }
                    }
                    opened_before = true;
                    self.run_session(socket, &mut shutdown).await;
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, error = %e, "Connection attempt failed");
                    if let Some(m) = &self.metrics {
                        m.record_error("connect");
                    }
                }
            }

            if !self.connection.closed() {
                // Shut down while connecting or serving
                break;
            }
            self.record_state();

            let Some(delay) = self.connection.next_reconnect_delay().await else {
                tracing::error!(url = %self.url, "Reconnection abandoned");
                self.record_state();
                self.link.lock().await.queue.clear();
                self.requests.fail_all(Error::ConnectionClosed);
                break;
            };

            tracing::info!(
                delay_ms = delay.as_millis() as u64,
                attempt = self.connection.attempt(),
                "Reconnecting"
            );
            if let Some(m) = &self.metrics {
                m.record_reconnection_attempt();
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::debug!(url = %self.url, "Connection task stopped");
    }

    /// Serve one live connection until it drops or shutdown is requested
    async fn run_session(&self, socket: Socket, shutdown: &mut watch::Receiver<bool>) {
        let (mut sink, mut frames) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        {
            let mut link = self.link.lock().await;
            let flushed = link.queue.len();
            for frame in link.queue.drain() {
                let _ = tx.send(frame);
            }
            link.writer = Some(tx);
            if flushed > 0 {
                tracing::debug!(frames = flushed, "Flushing queued frames");
            }
        }

        let mut writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(e) = sink.send(Message::Text(frame)).await {
                    tracing::warn!(error = %e, "Failed to write frame");
                    return;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        if self.connection.opened().await {
            tracing::info!(url = %self.url, "Connected");
            self.record_state();

            let mut writer_done = false;
            loop {
                tokio::select! {
                    frame = frames.next() => match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text).await,
                        Some(Ok(Message::Close(_))) => {
                            tracing::info!("Connection closed by server");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, "WebSocket error");
                            if let Some(m) = &self.metrics {
                                m.record_error("websocket");
                            }
                            break;
                        }
                        None => {
                            tracing::info!("Connection stream ended");
                            break;
                        }
                    },
                    _ = &mut writer => {
                        writer_done = true;
                        break;
                    }
                    _ = shutdown.changed() => break,
                }
            }

            self.link.lock().await.writer = None;
            if !writer_done {
                let _ = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await;
            }
        } else {
            // Shut down during the handshake
            self.link.lock().await.writer = None;
            let _ = tokio::time::timeout(WRITER_FLUSH_TIMEOUT, writer).await;
        }
    }

    /// Decode one text frame and route it
    pub(crate) async fn handle_frame(&self, text: &str) {
        let envelope = match codec::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, frame_len = text.len(), "Dropping malformed frame");
                if let Some(m) = &self.metrics {
                    m.record_error("decode");
                }
                return;
            }
        };

        let kind = envelope.kind.clone();
        if !self.router.dispatch(envelope).await {
            if let Some(m) = &self.metrics {
                m.record_unrouted(&kind);
            }
        }
    }
}

/// State shared by the built-in reply handlers
#[derive(Clone)]
struct InboundContext {
    requests: RequestManager,
    problems: broadcast::Sender<Problem>,
    metrics: Option<Arc<ClientMetrics>>,
}

impl InboundContext {
    async fn handle(&self, kind: &str, data: Value) {
        let message = match Inbound::decode(kind, data) {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(kind = %kind, error = %e, "Dropping message with invalid payload");
                if let Some(m) = &self.metrics {
                    m.record_error("payload");
                }
                return;
            }
        };

        match message {
            Inbound::Problem(problem) => {
                tracing::warn!(problem = %problem, "Backend reported an error");
                // Nobody listening is fine
                let _ = self.problems.send(problem);
            }
            Inbound::TaskResult(reply) => {
                if !self.requests.complete(&reply.task_id, Ok(reply.result)) {
                    tracing::debug!(task_id = %reply.task_id, "Ignoring result for unknown task");
                }
            }
            Inbound::TaskError(reply) => {
                let task_id = reply.task_id;
                if !self.requests.complete(&task_id, Err(Error::Problem(reply.error))) {
                    tracing::debug!(task_id = %task_id, "Ignoring error for unknown task");
                }
            }
            Inbound::ChatResponse(chunk) => {
                if let Some(m) = &self.metrics {
                    m.record_chat_chunk();
                }
                let chat_id = chunk.chat_id.clone();
                if !self.requests.deliver_chunk(chunk) {
                    tracing::debug!(chat_id = %chat_id, "Ignoring chunk for unknown chat");
                }
            }
            Inbound::ChatError(reply) => {
                if !self.requests.fail_stream(&reply.chat_id, reply.error) {
                    tracing::debug!(chat_id = %reply.chat_id, "Ignoring error for unknown chat");
                }
            }
        }
    }
}
