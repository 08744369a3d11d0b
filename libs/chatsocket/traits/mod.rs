//! # ChatSocket Traits
//!
//! Core traits and types shared by the connection core, the framings and
//! the transports:
//!
//! - **Framing**: Server dialect (JSON envelopes, STOMP)
//! - **TransportConnector**: Physical connection (WebSocket, SockJS, in-memory)
//! - **TokenProvider**: Auth token lookup and forced refresh
//! - **HeaderProvider**: Extra headers on the connection request
//! - **ReconnectionStrategy**: Delay between reconnection attempts
//! - **PongDetector**: Recognise heartbeat replies

pub mod auth;
pub mod error;
pub mod framing;
pub mod headers;
pub mod message;
pub mod pong_detector;
pub mod reconnect;
pub mod transport;

// Re-export commonly used types
pub use auth::{NoToken, StaticToken, TokenProvider};
pub use error::{Result, SocketError};
pub use framing::{Envelope, Framing, InboundFrame};
pub use headers::{HeaderProvider, Headers, NoHeaders, StaticHeaders};
pub use message::{Payload, WsMessage};
pub use pong_detector::{JsonPongDetector, NoOpPongDetector, PongDetector, TextPongDetector};
pub use reconnect::{ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy};
pub use transport::{
    TransportConnector, TransportEvent, TransportKind, TransportLink, TransportSink,
};
