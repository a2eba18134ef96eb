//! Common test utilities for taskwire-client integration tests
//!
//! A lightweight mock backend: it accepts WebSocket connections, records
//! every text frame it receives, and answers each one with whatever frames
//! the test's handler returns.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type Handler = Arc<
    dyn Fn(String) -> std::pin::Pin<Box<dyn Future<Output = Vec<String>> + Send>> + Send + Sync,
>;

/// Mock WebSocket backend for client testing
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    kick_tx: broadcast::Sender<()>,
    message_rx: mpsc::UnboundedReceiver<String>,
    accepts: Arc<Mutex<Vec<Instant>>>,
    close_frames: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a server that never replies
    pub async fn new() -> Self {
        Self::with_handler(|_| async { Vec::new() }).await
    }

    /// Start a server on an ephemeral port with a reply handler
    pub async fn with_handler<F, Fut>(handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::serve(listener, handler)
    }

    /// Start a server on a specific address
    pub async fn bind<F, Fut>(addr: SocketAddr, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        let listener = TcpListener::bind(addr).await.unwrap();
        Self::serve(listener, handler)
    }

    fn serve<F, Fut>(listener: TcpListener, handler: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        let addr = listener.local_addr().unwrap();
        let handler: Handler = Arc::new(move |frame| Box::pin(handler(frame)));

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (kick_tx, _) = broadcast::channel::<()>(16);
        let (msg_tx, message_rx) = mpsc::unbounded_channel::<String>();
        let accepts = Arc::new(Mutex::new(Vec::new()));
        let close_frames = Arc::new(AtomicUsize::new(0));

        let kick = kick_tx.clone();
        let accepted = Arc::clone(&accepts);
        let closes = Arc::clone(&close_frames);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        let _ = kick.send(());
                        break;
                    }
                    accept_result = listener.accept() => {
                        let Ok((stream, _)) = accept_result else { continue };
                        let handler = Arc::clone(&handler);
                        let msg_tx = msg_tx.clone();
                        let mut kick_rx = kick.subscribe();
                        let accepted = Arc::clone(&accepted);
                        let closes = Arc::clone(&closes);

                        tokio::spawn(async move {
                            let Ok(ws_stream) = accept_async(stream).await else { return };
                            accepted.lock().unwrap().push(Instant::now());
                            let (mut write, mut read) = ws_stream.split();

                            loop {
                                tokio::select! {
                                    msg = read.next() => match msg {
                                        Some(Ok(Message::Text(text))) => {
                                            let _ = msg_tx.send(text.clone());
                                            for reply in handler(text).await {
                                                if write.send(Message::Text(reply)).await.is_err() {
                                                    return;
                                                }
                                            }
                                        }
                                        Some(Ok(Message::Close(_))) => {
                                            closes.fetch_add(1, Ordering::SeqCst);
                                            return;
                                        }
                                        Some(Ok(_)) => {}
                                        Some(Err(_)) | None => return,
                                    },
                                    _ = kick_rx.recv() => {
                                        let _ = write.send(Message::Close(None)).await;
                                        return;
                                    }
                                }
                            }
                        });
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            kick_tx,
            message_rx,
            accepts,
            close_frames,
        }
    }

    /// Socket URL of this server
    pub fn url(&self) -> String {
        format!("ws://{}/api/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next frame received from any client, or `None` after five seconds
    pub async fn wait_for_message(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.message_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Close every live connection from the server side
    pub fn kick(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Times at which WebSocket handshakes completed
    pub fn accepts(&self) -> Vec<Instant> {
        self.accepts.lock().unwrap().clone()
    }

    /// Wait until at least `count` handshakes have completed
    pub async fn wait_for_accepts(&self, count: usize) -> Vec<Instant> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let accepts = self.accepts();
            if accepts.len() >= count {
                return accepts;
            }
            assert!(
                Instant::now() < deadline,
                "expected {} connections, saw {}",
                count,
                accepts.len()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Close frames received from clients
    pub fn close_frames(&self) -> usize {
        self.close_frames.load(Ordering::SeqCst)
    }

    /// Stop accepting and drop every live connection
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// An address nothing is listening on yet
pub async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Parse a received frame into `(type, data)`
pub fn parse_frame(frame: &str) -> (String, Value) {
    let value: Value = serde_json::from_str(frame).unwrap();
    (
        value["type"].as_str().unwrap().to_string(),
        value["data"].clone(),
    )
}

pub fn task_result(task_id: &str, result: Value) -> String {
    json!({"type": "task.result", "data": {"task_id": task_id, "result": result}}).to_string()
}

pub fn task_error(task_id: &str, title: &str) -> String {
    json!({"type": "task.error", "data": {"task_id": task_id, "error": {"title": title}}})
        .to_string()
}

pub fn chat_chunk(chat_id: &str, content: Option<&str>, done: bool) -> String {
    let mut data = json!({"chat_id": chat_id, "done": done});
    if let Some(content) = content {
        data["message"] = json!({"content": content, "role": "assistant"});
    }
    json!({"type": "chat.response", "data": data}).to_string()
}

pub fn chat_error(chat_id: &str, title: &str) -> String {
    json!({"type": "chat.error", "data": {"chat_id": chat_id, "error": {"title": title}}})
        .to_string()
}

pub fn ambient_error(title: &str) -> String {
    json!({"type": "error", "data": {"title": title}}).to_string()
}
