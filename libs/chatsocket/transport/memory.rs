//! In-process transport
//!
//! A [`MemoryServer`] plays the remote end. Every accepted connection shows
//! up as a [`MemoryPeer`] that sees what the client sent and can push frames,
//! keepalives or closes back. Connect attempts can be scripted to fail or
//! hang, which makes reconnection and fallback paths testable under paused
//! tokio time.

use crate::traits::*;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// What the next connect attempt does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Refuse(String),
    /// Rejected during session setup with a close code
    Reject { code: u16, reason: String },
    /// Opens, but the server side is already gone
    AcceptThenDrop,
    /// Never completes; only a connect timeout ends it
    Hang,
}

/// Something the client did on an accepted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    Message(WsMessage),
    Closed { code: u16, reason: String },
}

struct ServerInner {
    script: Mutex<VecDeque<ConnectOutcome>>,
    refuse_all: AtomicBool,
    attempts: AtomicUsize,
    urls: Mutex<Vec<String>>,
    headers: Mutex<Vec<Headers>>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

/// Scriptable in-memory server
#[derive(Clone)]
pub struct MemoryServer {
    inner: Arc<ServerInner>,
}

impl MemoryServer {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ServerInner {
                script: Mutex::new(VecDeque::new()),
                refuse_all: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                headers: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Connector reaching this server as a native transport
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector::new(self.clone(), TransportKind::Native)
    }

    /// Script the outcome of the next unscripted attempt
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.inner.script.lock().push_back(outcome);
    }

    /// Refuse the next `n` attempts
    pub fn refuse_next(&self, n: usize) {
        let mut script = self.inner.script.lock();
        for _ in 0..n {
            script.push_back(ConnectOutcome::Refuse("connection refused".into()));
        }
    }

    /// Refuse every unscripted attempt until turned off
    pub fn set_refuse_all(&self, refuse: bool) {
        self.inner.refuse_all.store(refuse, Ordering::Release);
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::Acquire)
    }

    /// URLs of every connect attempt, in order
    pub fn urls(&self) -> Vec<String> {
        self.inner.urls.lock().clone()
    }

    /// Request headers of every connect attempt, in order
    pub fn headers(&self) -> Vec<Headers> {
        self.inner.headers.lock().clone()
    }

    /// Wait for the next accepted connection
    pub async fn accept(&self) -> Option<MemoryPeer> {
        self.inner.peers_rx.lock().await.recv().await
    }

    pub fn try_accept(&self) -> Option<MemoryPeer> {
        self.inner.peers_rx.try_lock().ok()?.try_recv().ok()
    }

    fn next_outcome(&self) -> ConnectOutcome {
        self.inner.script.lock().pop_front().unwrap_or_else(|| {
            if self.inner.refuse_all.load(Ordering::Acquire) {
                ConnectOutcome::Refuse("connection refused".into())
            } else {
                ConnectOutcome::Accept
            }
        })
    }
}

impl Default for MemoryServer {
    fn default() -> Self {
        Self::new()
    }
}

/// Connector for a [`MemoryServer`]
#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
    kind: TransportKind,
    supported: bool,
}

impl MemoryConnector {
    pub fn new(server: MemoryServer, kind: TransportKind) -> Self {
        Self {
            server,
            kind,
            supported: true,
        }
    }

    /// Report the transport as unavailable in this environment
    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn connect(&self, url: &str, headers: &Headers) -> Result<TransportLink> {
        let inner = &self.server.inner;
        inner.attempts.fetch_add(1, Ordering::AcqRel);
        inner.urls.lock().push(url.to_string());
        inner.headers.lock().push(headers.clone());

        let keep_peer = match self.server.next_outcome() {
            ConnectOutcome::Accept => true,
            ConnectOutcome::AcceptThenDrop => false,
            ConnectOutcome::Refuse(reason) => return Err(SocketError::Transport(reason)),
            ConnectOutcome::Reject { code, reason } => {
                return Err(SocketError::ConnectionClosed { code, reason })
            }
            ConnectOutcome::Hang => std::future::pending::<bool>().await,
        };

        let (to_client, events) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let peer = MemoryPeer {
            url: url.to_string(),
            kind: self.kind,
            to_client,
            from_client,
        };
        if keep_peer {
            inner
                .peers_tx
                .send(peer)
                .map_err(|_| SocketError::Transport("memory server is gone".into()))?;
            debug!(url, kind = ?self.kind, "Memory connection accepted");
        } else {
            drop(peer);
            debug!(url, kind = ?self.kind, "Memory connection accepted and dropped");
        }

        Ok(TransportLink::new(
            Box::new(MemorySink { to_server }),
            events,
            None,
        ))
    }
}

struct MemorySink {
    to_server: mpsc::UnboundedSender<PeerFrame>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn send(&mut self, message: WsMessage) -> Result<()> {
        self.to_server
            .send(PeerFrame::Message(message))
            .map_err(|_| SocketError::Transport("peer disconnected".into()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let _ = self.to_server.send(PeerFrame::Closed {
            code,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

/// Server side of one accepted connection
///
/// Dropping it ends the connection as an abnormal closure.
pub struct MemoryPeer {
    url: String,
    kind: TransportKind,
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<PeerFrame>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Push a frame to the client; false if the client side is gone
    pub fn send(&self, message: WsMessage) -> bool {
        self.to_client.send(TransportEvent::Message(message)).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsMessage::Text(text.into()))
    }

    pub fn send_json(&self, value: serde_json::Value) -> bool {
        self.send(WsMessage::Text(value.to_string()))
    }

    /// Transport-level keepalive (like a WebSocket pong)
    pub fn keepalive(&self) -> bool {
        self.to_client.send(TransportEvent::Activity).is_ok()
    }

    /// Close from the server side
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next thing the client did
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.from_client.recv().await
    }

    /// Next message the client sent; `None` once it closed
    pub async fn recv_message(&mut self) -> Option<WsMessage> {
        match self.recv().await? {
            PeerFrame::Message(message) => Some(message),
            PeerFrame::Closed { .. } => None,
        }
    }

    /// Next text message parsed as JSON
    pub async fn recv_json(&mut self) -> Option<serde_json::Value> {
        let message = self.recv_message().await?;
        serde_json::from_str(message.as_text()?).ok()
    }

    /// Everything the client sent so far without waiting
    pub fn drain(&mut self) -> Vec<PeerFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accept_and_exchange() {
        let server = MemoryServer::new();
        let connector = server.connector();
        let mut link = connector.connect("mem://chat", &Headers::new()).await.unwrap();
        let mut peer = server.accept().await.unwrap();
        assert_eq!(peer.url(), "mem://chat");

        link.sink.send(WsMessage::text("hello")).await.unwrap();
        assert_eq!(peer.recv_message().await, Some(WsMessage::text("hello")));

        assert!(peer.send_text("world"));
        assert_eq!(
            link.events.recv().await,
            Some(TransportEvent::Message(WsMessage::text("world")))
        );

        link.sink.close(1000, "bye").await.unwrap();
        assert_eq!(
            peer.recv().await,
            Some(PeerFrame::Closed { code: 1000, reason: "bye".into() })
        );
    }

    #[tokio::test]
    async fn test_scripted_refusals() {
        let server = MemoryServer::new();
        server.refuse_next(2);
        let connector = server.connector();
        assert!(connector.connect("mem://a", &Headers::new()).await.is_err());
        assert!(connector.connect("mem://b", &Headers::new()).await.is_err());
        assert!(connector.connect("mem://c", &Headers::new()).await.is_ok());
        assert_eq!(server.attempts(), 3);
        assert_eq!(server.urls(), vec!["mem://a", "mem://b", "mem://c"]);
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_event_stream() {
        let server = MemoryServer::new();
        let mut link = server.connector().connect("mem://x", &Headers::new()).await.unwrap();
        drop(server.accept().await.unwrap());
        assert_eq!(link.events.recv().await, None);
        assert!(link.sink.send(WsMessage::text("late")).await.is_err());
    }
}
