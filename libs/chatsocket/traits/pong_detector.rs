//! PONG Detection Trait
//!
//! Servers answer heartbeat pings in different shapes (bare text, a JSON
//! object with a type field, ...). A detected pong counts as inbound activity
//! but is not delivered to subscribers or message listeners.

use crate::traits::Payload;

/// Trait for detecting PONG responses in the decoded message stream
pub trait PongDetector: Send + Sync {
    /// Check if the given decoded payload is a PONG response
    fn is_pong(&self, payload: &Payload) -> bool;
}

/// Detects PONG messages that are exactly the configured text string.
pub struct TextPongDetector {
    pong_text: String,
}

impl TextPongDetector {
    pub fn new(pong_text: impl Into<String>) -> Self {
        Self {
            pong_text: pong_text.into(),
        }
    }
}

impl PongDetector for TextPongDetector {
    fn is_pong(&self, payload: &Payload) -> bool {
        match payload {
            Payload::Text(text) => text == &self.pong_text,
            // "pong" is valid JSON when quoted, so accept the string form too
            Payload::Json(serde_json::Value::String(text)) => text == &self.pong_text,
            _ => false,
        }
    }
}

/// Detects JSON objects whose `field` equals `value`, e.g. `{"type":"pong"}`
pub struct JsonPongDetector {
    field: String,
    value: String,
}

impl JsonPongDetector {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl PongDetector for JsonPongDetector {
    fn is_pong(&self, payload: &Payload) -> bool {
        payload
            .field_str(&self.field)
            .is_some_and(|v| v == self.value)
    }
}

/// No-op PONG detector that never detects PONGs
pub struct NoOpPongDetector;

impl PongDetector for NoOpPongDetector {
    fn is_pong(&self, _payload: &Payload) -> bool {
        false
    }
}
