//! Shipped server dialects
//!
//! - [`JsonFraming`]: JSON envelopes over a plain WebSocket
//! - [`StompFraming`]: STOMP 1.2 over WebSocket or SockJS

pub mod json;
pub mod stomp;

pub use json::{ControlFrameBuilder, JsonFraming};
pub use stomp::{StompFrame, StompFraming};
