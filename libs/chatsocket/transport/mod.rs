//! Transports
//!
//! - [`TungsteniteConnector`]: native WebSocket
//! - [`SockJsConnector`]: SockJS XHR-polling fallback
//! - [`MemoryConnector`]: in-process pair for tests
//!
//! [`TransportSelector`] decides which one each attempt uses.

pub mod memory;
pub mod selector;
pub mod sockjs;
pub mod tungstenite;

pub use memory::{ConnectOutcome, MemoryConnector, MemoryPeer, MemoryServer, PeerFrame};
pub use selector::{TransportMode, TransportSelector};
pub use sockjs::SockJsConnector;
pub use tungstenite::TungsteniteConnector;
