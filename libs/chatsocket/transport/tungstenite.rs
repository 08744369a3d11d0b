//! Native WebSocket transport over `tokio-tungstenite`

use crate::traits::*;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code reported when the socket dies without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Opens native WebSocket connections
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransportConnector for TungsteniteConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Native
    }

    async fn connect(&self, url: &str, headers: &Headers) -> Result<TransportLink> {
        let mut request = url
            .into_client_request()
            .map_err(|e| SocketError::Configuration(format!("Invalid URL {url}: {e}")))?;

        for (key, value) in headers {
            match (
                key.parse::<http::header::HeaderName>(),
                value.parse::<http::header::HeaderValue>(),
            ) {
                (Ok(name), Ok(value)) => {
                    request.headers_mut().insert(name, value);
                }
                (Err(_), _) => warn!("Invalid header name: {}", key),
                (_, Err(_)) => warn!("Invalid header value for key '{}'", key),
            }
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        debug!("WebSocket handshake complete");

        let (write, read) = stream.split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(read, event_tx));

        Ok(TransportLink::new(
            Box::new(TungsteniteSink { write }),
            event_rx,
            Some(reader),
        ))
    }
}

async fn read_loop(mut read: SplitStream<WsStream>, events: mpsc::UnboundedSender<TransportEvent>) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => TransportEvent::Message(WsMessage::Text(text)),
            Ok(Message::Binary(data)) => TransportEvent::Message(WsMessage::Binary(data)),
            // tungstenite answers pings itself; both directions prove liveness
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => TransportEvent::Activity,
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or((1005, String::new()));
                let _ = events.send(TransportEvent::Closed { code, reason });
                return;
            }
            Ok(Message::Frame(_)) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: e.to_string(),
                });
                return;
            }
        };
        if events.send(event).is_err() {
            return;
        }
    }
    let _ = events.send(TransportEvent::Closed {
        code: ABNORMAL_CLOSURE,
        reason: "stream ended".to_string(),
    });
}

struct TungsteniteSink {
    write: SplitSink<WsStream, Message>,
}

fn to_tungstenite(message: WsMessage) -> Message {
    match message {
        WsMessage::Text(text) => Message::Text(text),
        WsMessage::Binary(data) => Message::Binary(data),
    }
}

#[async_trait]
impl TransportSink for TungsteniteSink {
    async fn send(&mut self, message: WsMessage) -> Result<()> {
        self.write
            .send(to_tungstenite(message))
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        self.write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        let _ = self.write.close().await;
        Ok(())
    }
}
