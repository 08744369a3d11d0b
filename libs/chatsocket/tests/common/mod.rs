//! Common test utilities for ChatSocket integration tests
//!
//! Most tests drive the client against a [`MemoryServer`] under paused tokio
//! time; [`MockWsServer`] is a real WebSocket echo server for the native
//! transport.

#![allow(dead_code)]

use chatsocket::core::builder::states::{HasEndpoint, HasFraming};
use chatsocket::{
    ChatSocket, ChatSocketBuilder, ClientEvent, ConnectionSettings, EventKind, Framing,
    MemoryServer, TransportMode,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Settings with short, jitter-free retries: 100ms, 200ms, 400ms, ... 1.6s
pub fn test_settings() -> ConnectionSettings {
    let mut settings = ConnectionSettings::for_url("ws://chat.test/ws");
    settings.retry_min = Duration::from_millis(100);
    settings.retry_max = Duration::from_millis(1600);
    settings.retry_factor = 2.0;
    settings.retry_jitter = 0.0;
    settings.max_retries = None;
    settings.heartbeat_interval = Duration::from_secs(25);
    settings.request_timeout = Duration::from_secs(15);
    settings.connect_timeout = Duration::from_secs(5);
    settings
}

/// Builder wired to a memory server as the only transport
pub fn memory_builder(
    server: &MemoryServer,
    settings: ConnectionSettings,
    framing: impl Framing,
) -> ChatSocketBuilder<HasEndpoint, HasFraming> {
    ChatSocket::builder()
        .settings(settings)
        .framing(framing)
        .transport_mode(TransportMode::Native)
        .native_connector(server.connector())
}

/// Poll `probe` every millisecond of (virtual) time until it yields a value
pub async fn wait_for<T>(within: Duration, mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if let Some(value) = probe() {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Next event of `kind` from an event stream, skipping others
pub async fn next_event(
    events: &crossbeam_channel::Receiver<ClientEvent>,
    kind: EventKind,
    within: Duration,
) -> Option<ClientEvent> {
    wait_for(within, || {
        while let Ok(event) = events.try_recv() {
            if event.kind() == kind {
                return Some(event);
            }
        }
        None
    })
    .await
}

/// Every event currently buffered in a stream
pub fn drain_events(events: &crossbeam_channel::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    events.try_iter().collect()
}

/// A simple mock WebSocket server for testing
///
/// Echoes text and binary frames, answers pings with pongs.
pub struct MockWsServer {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl MockWsServer {
    /// Create and start a new mock WebSocket server
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, _)) => {
                                let shutdown = shutdown_clone.clone();
                                tokio::spawn(async move {
                                    Self::handle_connection(stream, shutdown).await;
                                });
                            }
                            Err(e) => {
                                eprintln!("Accept error: {}", e);
                                break;
                            }
                        }
                    }
                    _ = shutdown_clone.notified() => {
                        break;
                    }
                }
            }
        });

        Self { addr, shutdown }
    }

    async fn handle_connection(stream: tokio::net::TcpStream, shutdown: Arc<Notify>) {
        use futures_util::{SinkExt, StreamExt};
        use tokio_tungstenite::accept_async;

        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                eprintln!("WebSocket handshake failed: {}", e);
                return;
            }
        };

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(msg)) => {
                            if msg.is_text() || msg.is_binary() {
                                if write.send(msg).await.is_err() {
                                    break;
                                }
                            } else if msg.is_ping() {
                                let pong = tokio_tungstenite::tungstenite::Message::Pong(msg.into_data());
                                if write.send(pong).await.is_err() {
                                    break;
                                }
                            } else if msg.is_close() {
                                break;
                            }
                        }
                        Some(Err(_)) | None => break,
                    }
                }
                _ = shutdown.notified() => {
                    break;
                }
            }
        }
    }

    /// Get the WebSocket URL for this server
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Shutdown the server
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Collect events until one of `kind` arrives (inclusive)
///
/// Returns everything collected so far if it never does.
pub async fn collect_until(
    events: &crossbeam_channel::Receiver<ClientEvent>,
    kind: EventKind,
    within: Duration,
) -> Vec<ClientEvent> {
    let mut collected = Vec::new();
    wait_for(within, || {
        while let Ok(event) = events.try_recv() {
            let done = event.kind() == kind;
            collected.push(event);
            if done {
                return Some(());
            }
        }
        None
    })
    .await;
    collected
}
