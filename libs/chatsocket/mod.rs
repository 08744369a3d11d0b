//! # ChatSocket
//!
//! A resilient persistent-connection messaging client.
//!
//! ## Features
//!
//! - **One connection, many topics**: Reference-counted subscriptions,
//!   restored automatically after every reconnect
//! - **Never lose a send**: Messages sent while disconnected are queued
//!   (bounded, drop-oldest) and flushed in call order on the next open
//! - **Request/reply**: Correlation ids, per-request timeouts, cancellation
//! - **Self-healing**: Exponential backoff with jitter, heartbeat-driven
//!   dead-connection detection, token refresh after auth-related closes
//! - **Pluggable dialects and transports**: JSON envelopes or STOMP, over
//!   native WebSocket with a SockJS fallback

pub mod core;
pub mod framing;
pub mod traits;
pub mod transport;

// Re-export all traits
pub use traits::*;

// Re-export core client functionality
pub use crate::core::{
    builder,
    builder::{states, ChatSocketBuilder},
    client::{ChatSocket, Metrics},
    config::{
        ClientConfig, DEFAULT_AUTH_CLOSE_CODES, HEARTBEAT_TIMEOUT_CLOSE_CODE, NORMAL_CLOSE_CODE,
        OFFLINE_CLOSE_CODE,
    },
    connection_state::ConnectionState,
    events::{ClientEvent, EventKind, ListenerHandle},
    heartbeat::HeartbeatPolicy,
    registry::{MessageHandler, SubscriptionHandle},
    settings::{resolve, ConnectionSettings, SettingsLayer},
};

pub use framing::{JsonFraming, StompFraming};
pub use transport::{
    MemoryConnector, MemoryPeer, MemoryServer, SockJsConnector, TransportMode, TungsteniteConnector,
};

pub use tokio_util::sync::CancellationToken;
