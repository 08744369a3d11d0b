//! Transport abstraction
//!
//! A connector opens one physical connection and hands back a
//! [`TransportLink`]: a sink for outbound frames plus a channel of inbound
//! [`TransportEvent`]s fed by a reader task the connector owns. Reading
//! through a channel keeps the connection task's `select!` cancel-safe for
//! every transport, including HTTP polling.

use crate::traits::{Headers, Result, WsMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which family of transport a connector provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Native WebSocket
    Native,
    /// HTTP based fallback (SockJS)
    Fallback,
}

/// Something that happened on an open connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Application data frame
    Message(WsMessage),
    /// Transport-level keepalive (e.g. WebSocket pong) observed
    Activity,
    /// Non-fatal socket error; a `Closed` event follows if the socket died
    Error(String),
    /// The connection is gone
    Closed { code: u16, reason: String },
}

/// Outbound half of an open connection
#[async_trait]
pub trait TransportSink: Send {
    /// Transmit one frame
    async fn send(&mut self, message: WsMessage) -> Result<()>;

    /// Close the connection with a close code and reason
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// An open connection
pub struct TransportLink {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    reader: Option<JoinHandle<()>>,
}

impl TransportLink {
    pub fn new(
        sink: Box<dyn TransportSink>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
        reader: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            sink,
            events,
            reader,
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Opens connections of one transport kind
#[async_trait]
pub trait TransportConnector: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Whether this transport can be used in the current environment
    fn is_supported(&self) -> bool {
        true
    }

    /// Open a connection to `url`
    async fn connect(&self, url: &str, headers: &Headers) -> Result<TransportLink>;
}
