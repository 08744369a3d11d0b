use serde_json::Value;

/// Raw data as it travels over a transport.
/// Can be Text or Binary data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl WsMessage {
    /// Create a text message
    pub fn text(s: impl Into<String>) -> Self {
        WsMessage::Text(s.into())
    }

    /// Get the message as text, if it is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            WsMessage::Text(s) => Some(s),
            WsMessage::Binary(_) => None,
        }
    }

    /// Get the message as binary, if it is binary
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            WsMessage::Text(_) => None,
            WsMessage::Binary(b) => Some(b),
        }
    }

    /// Get the raw bytes regardless of message type
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            WsMessage::Text(s) => s.as_bytes(),
            WsMessage::Binary(b) => b,
        }
    }

    /// Check if message is text
    pub fn is_text(&self) -> bool {
        matches!(self, WsMessage::Text(_))
    }

    /// Check if message is binary
    pub fn is_binary(&self) -> bool {
        matches!(self, WsMessage::Binary(_))
    }
}

/// Application payload, before encoding or after decoding.
///
/// Inbound frames that are not valid JSON arrive as `Text`, so plain-text
/// control frames from the server are never lost.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(Value),
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    /// Structured view of the payload, if it parsed as JSON
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a top-level string or number field of a JSON object payload
    pub fn field_str(&self, key: &str) -> Option<String> {
        match self.as_json()?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Binary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_str_reads_strings_and_numbers() {
        let payload = Payload::Json(json!({"id": 7, "topic": "room.1", "nested": {"a": 1}}));
        assert_eq!(payload.field_str("id").as_deref(), Some("7"));
        assert_eq!(payload.field_str("topic").as_deref(), Some("room.1"));
        assert_eq!(payload.field_str("nested"), None);
        assert_eq!(payload.field_str("missing"), None);
        assert_eq!(Payload::from("raw").field_str("id"), None);
    }

    #[test]
    fn test_ws_message_views() {
        let text = WsMessage::text("hello");
        assert!(text.is_text());
        assert_eq!(text.as_text(), Some("hello"));
        assert_eq!(text.as_bytes(), b"hello");

        let bin = WsMessage::Binary(vec![1, 2, 3]);
        assert!(bin.is_binary());
        assert_eq!(bin.as_binary(), Some(&[1u8, 2, 3][..]));
        assert_eq!(bin.as_text(), None);
    }
}
