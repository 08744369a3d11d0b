//! # ChatSocket core
//!
//! The connection task and everything it owns:
//!
//! - **client**: `ChatSocket` handle plus the connection state machine
//! - **builder**: Type-state builder, endpoint and framing required
//! - **settings**: Layered endpoint/retry/timeout configuration
//! - **outbound**: Bounded drop-oldest queue for sends while disconnected
//! - **pending**: Request/reply correlation with timeouts and cancellation
//! - **registry**: Reference-counted topic subscriptions
//! - **events**: Lifecycle event bus
//! - **heartbeat**: Idle detection and forced reconnect
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatsocket::{ChatSocket, ConnectionSettings, JsonFraming, StaticToken};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> chatsocket::Result<()> {
//!     let client = ChatSocket::builder()
//!         .settings(ConnectionSettings::for_url("wss://chat.example.com/ws"))
//!         .framing(JsonFraming::new())
//!         .token_provider(StaticToken::new("secret"))
//!         .build()
//!         .await?;
//!
//!     client.connect().await?;
//!     let _room = client.subscribe("room.1", |msg| println!("room.1: {msg:?}"));
//!     client.publish("room.1", json!({ "text": "hello" }));
//!     Ok(())
//! }
//! ```

pub mod activity;
pub mod builder;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection_state;
pub mod events;
pub mod heartbeat;
pub mod outbound;
pub mod pending;
pub mod registry;
pub mod settings;

// Re-export main types
pub use builder::{states, ChatSocketBuilder};
pub use client::{ChatSocket, Metrics};
pub use config::ClientConfig;
pub use connection_state::{AtomicConnectionState, AtomicMetrics, ConnectionState};
pub use events::{ClientEvent, EventBus, EventKind, ListenerHandle};
pub use heartbeat::{HeartbeatAction, HeartbeatMonitor, HeartbeatPolicy};
pub use outbound::{OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use pending::{PendingRequests, ReplyWaiter};
pub use registry::{MessageHandler, Removal, SubscriptionHandle, SubscriptionRegistry};
pub use settings::{ConnectionSettings, SettingsLayer};

/// Create a new chat client builder
///
/// # Example
/// ```ignore
/// let client = chatsocket::builder()
///     .url("wss://chat.example.com/ws")
///     .framing(StompFraming::new("/app/chat"))
///     .build()
///     .await?;
/// ```
pub fn builder() -> ChatSocketBuilder<states::NoEndpoint, states::NoFraming> {
    ChatSocketBuilder::new()
}
