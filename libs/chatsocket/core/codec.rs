//! Payload <-> wire conversion
//!
//! Encoding never fails and decoding never fails. Servers mix plain-text
//! control frames with JSON payloads on the same socket, so anything that
//! does not parse comes back as raw text instead of an error.

use crate::traits::{Payload, WsMessage};
use serde::Serialize;
use tracing::warn;

/// Substituted for payloads that cannot be serialized
pub const UNSERIALIZABLE_PLACEHOLDER: &str = "[unserializable]";

/// Encode an application payload for the wire
///
/// Text and binary pass through unchanged; JSON values are serialized.
pub fn encode(payload: &Payload) -> WsMessage {
    match payload {
        Payload::Text(text) => WsMessage::Text(text.clone()),
        Payload::Binary(data) => WsMessage::Binary(data.clone()),
        Payload::Json(value) => encode_value(value),
    }
}

/// Serialize any value to a text frame, substituting a placeholder on failure
pub fn encode_value<T: Serialize + ?Sized>(value: &T) -> WsMessage {
    match serde_json::to_string(value) {
        Ok(text) => WsMessage::Text(text),
        Err(e) => {
            warn!(error = %e, "Failed to serialize outbound payload, sending placeholder");
            WsMessage::Text(UNSERIALIZABLE_PLACEHOLDER.to_string())
        }
    }
}

/// Decode a wire message into a payload
///
/// Text is parsed as JSON, falling back to the raw string. Binary is first
/// decoded as UTF-8 text (lossily), then treated the same way.
pub fn decode(message: WsMessage) -> Payload {
    match message {
        WsMessage::Text(text) => decode_text(text),
        WsMessage::Binary(data) => {
            let text = match String::from_utf8(data) {
                Ok(text) => text,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            };
            decode_text(text)
        }
    }
}

/// Parse text as JSON, or keep it as raw text
pub fn decode_text(text: String) -> Payload {
    match serde_json::from_str(&text) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Text(text),
    }
}
