//! Wire framing strategy
//!
//! The connection core is the same for every server dialect: backoff,
//! heartbeat, queueing, correlation and resubscription never look inside a
//! frame. Everything that does is behind [`Framing`].
//!
//! ```text
//! send/publish/request ──> Framing::encode_* ──> WsMessage ──> Transport
//! Transport ──> WsMessage ──> Framing::decode ──> InboundFrame
//!                                                   ├─ Keepalive      (activity only)
//!                                                   ├─ Connected      (handshake ack)
//!                                                   ├─ ProtocolError  (error event)
//!                                                   └─ Data(Envelope) (registry / correlator / listeners)
//! ```

use crate::traits::{Payload, WsMessage};

/// A decoded application message with its routing fields pulled out
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic or destination the message was published on
    pub topic: Option<String>,
    /// Correlation id echoed from a request
    pub correlation_id: Option<String>,
    /// The decoded message
    pub body: Payload,
}

impl Envelope {
    pub fn new(body: Payload) -> Self {
        Self {
            topic: None,
            correlation_id: None,
            body,
        }
    }
}

/// Classification of one inbound wire message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Pong or server heartbeat; only refreshes liveness
    Keepalive,
    /// Handshake acknowledged by the server
    Connected,
    /// Server-side rejection or unparseable protocol frame
    ProtocolError(String),
    /// Application data
    Data(Envelope),
}

/// Server dialect used on top of the transport
///
/// Implementations must be cheap to call from any task: encoding happens on
/// the caller's side, decoding inside the connection task.
pub trait Framing: Send + Sync + 'static {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Frames sent right after the transport opens
    fn handshake(&self, token: Option<&str>) -> Vec<WsMessage> {
        let _ = token;
        Vec::new()
    }

    /// Whether the connection only counts as open after [`InboundFrame::Connected`]
    fn requires_handshake_ack(&self) -> bool {
        false
    }

    /// Whether the auth token travels inside the handshake instead of a header
    fn carries_token_in_handshake(&self) -> bool {
        false
    }

    /// Frame sent right before a deliberate close
    fn goodbye(&self) -> Option<WsMessage> {
        None
    }

    /// Encode a plain outbound message
    fn encode_send(&self, payload: &Payload) -> WsMessage;

    /// Encode a message published on `topic`
    fn encode_publish(&self, topic: &str, payload: &Payload) -> WsMessage;

    /// Encode a request carrying `correlation_id`
    fn encode_request(&self, payload: &Payload, correlation_id: &str) -> WsMessage;

    /// Server-side subscribe frame, `None` if the dialect has no such frame
    fn subscribe_frame(&self, topic: &str) -> Option<WsMessage>;

    /// Server-side unsubscribe frame
    fn unsubscribe_frame(&self, topic: &str) -> Option<WsMessage>;

    /// Liveness probe sent by the heartbeat when the connection is idle
    fn ping_frame(&self) -> Option<WsMessage>;

    /// Classify an inbound message
    fn decode(&self, message: WsMessage) -> InboundFrame;
}
