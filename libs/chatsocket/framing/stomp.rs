//! STOMP 1.2 framing
//!
//! ```text
//! COMMAND\n
//! header:value\n
//! ...
//! \n
//! body\0
//! ```
//!
//! A lone EOL is a heart-beat. Header values are escaped (`\\`, `\n`, `\r`,
//! `\c`) on every frame except CONNECT and CONNECTED.
//!
//! The connection only counts as open once the server answers CONNECT with
//! CONNECTED. The bearer token travels in the CONNECT frame, not in the
//! WebSocket upgrade request.

use crate::core::codec;
use crate::traits::{Envelope, Framing, InboundFrame, Payload, WsMessage};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// One STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(value: &str) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some(other) => return Err(format!("invalid header escape \\{other}")),
            None => return Err("dangling backslash in header".to_string()),
        }
    }
    Ok(out)
}

fn escapes_headers(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header (repeated headers: the first one wins)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn to_wire(&self) -> String {
        let escaped = escapes_headers(&self.command);
        let mut out = String::with_capacity(self.command.len() + self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escaped {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parse one frame; `Ok(None)` for a heart-beat (EOLs only)
    pub fn parse(text: &str) -> Result<Option<StompFrame>, String> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() || text == "\0" {
            return Ok(None);
        }

        let (head, rest) = match text.find("\n\n") {
            Some(i) => (&text[..i], &text[i + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(i) => (&text[..i], &text[i + 4..]),
                None => return Err("frame has no header terminator".to_string()),
            },
        };

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command = lines
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| "frame has no command".to_string())?
            .to_string();

        let escaped = escapes_headers(&command);
        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| format!("malformed header line {line:?}"))?;
            if escaped {
                headers.push((unescape(name)?, unescape(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let frame = StompFrame {
            command,
            headers,
            body: String::new(),
        };
        let body = match frame.get("content-length").and_then(|l| l.parse::<usize>().ok()) {
            Some(len) if len <= rest.len() && rest.is_char_boundary(len) => &rest[..len],
            _ => rest.split('\0').next().unwrap_or(""),
        };
        Ok(Some(StompFrame {
            body: body.to_string(),
            ..frame
        }))
    }
}

/// STOMP over WebSocket
pub struct StompFraming {
    host: String,
    heart_beat: (Duration, Duration),
    send_destination: String,
    reply_to: Option<String>,
    id_key: String,
    subscription_ids: Mutex<HashMap<String, String>>,
    next_subscription: AtomicU64,
}

impl StompFraming {
    /// `send_destination` receives plain `send()` and `request()` frames
    pub fn new(send_destination: impl Into<String>) -> Self {
        Self {
            host: "/".to_string(),
            heart_beat: (Duration::ZERO, Duration::ZERO),
            send_destination: send_destination.into(),
            reply_to: None,
            id_key: "correlationId".to_string(),
            subscription_ids: Mutex::new(HashMap::new()),
            next_subscription: AtomicU64::new(0),
        }
    }

    /// Virtual host announced in CONNECT
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// `heart-beat` header: how often we send / want to receive heart-beats
    pub fn with_heart_beat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heart_beat = (outgoing, incoming);
        self
    }

    /// Destination the server should send replies to
    pub fn with_reply_to(mut self, destination: impl Into<String>) -> Self {
        self.reply_to = Some(destination.into());
        self
    }

    /// Body field that also carries the correlation id
    pub fn with_id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = key.into();
        self
    }

    /// Subscription id currently assigned to a destination
    pub fn subscription_id(&self, destination: &str) -> Option<String> {
        self.subscription_ids.lock().get(destination).cloned()
    }

    fn send_frame(&self, destination: &str, payload: &Payload) -> StompFrame {
        let content_type = match payload {
            Payload::Json(_) => "application/json",
            Payload::Text(_) => "text/plain",
            Payload::Binary(_) => "application/octet-stream",
        };
        let body = match codec::encode(payload) {
            WsMessage::Text(text) => text,
            WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
        };
        StompFrame::new("SEND")
            .header("destination", destination)
            .header("content-type", content_type)
            .body(body)
    }
}

fn wire(frame: StompFrame) -> WsMessage {
    WsMessage::Text(frame.to_wire())
}

impl Framing for StompFraming {
    fn name(&self) -> &'static str {
        "stomp"
    }

    fn handshake(&self, token: Option<&str>) -> Vec<WsMessage> {
        let (out, inc) = self.heart_beat;
        let mut connect = StompFrame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", self.host.clone())
            .header("heart-beat", format!("{},{}", out.as_millis(), inc.as_millis()));
        if let Some(token) = token {
            connect = connect.header("Authorization", format!("Bearer {token}"));
        }
        vec![wire(connect)]
    }

    fn requires_handshake_ack(&self) -> bool {
        true
    }

    fn carries_token_in_handshake(&self) -> bool {
        true
    }

    fn goodbye(&self) -> Option<WsMessage> {
        Some(wire(StompFrame::new("DISCONNECT")))
    }

    fn encode_send(&self, payload: &Payload) -> WsMessage {
        wire(self.send_frame(&self.send_destination, payload))
    }

    fn encode_publish(&self, topic: &str, payload: &Payload) -> WsMessage {
        wire(self.send_frame(topic, payload))
    }

    fn encode_request(&self, payload: &Payload, correlation_id: &str) -> WsMessage {
        let payload = match payload {
            Payload::Json(Value::Object(fields)) => {
                let mut fields = fields.clone();
                fields.insert(self.id_key.clone(), Value::String(correlation_id.to_string()));
                Payload::Json(Value::Object(fields))
            }
            other => other.clone(),
        };
        let mut frame = self
            .send_frame(&self.send_destination, &payload)
            .header("correlation-id", correlation_id);
        if let Some(reply_to) = &self.reply_to {
            frame = frame.header("reply-to", reply_to.clone());
        }
        wire(frame)
    }

    fn subscribe_frame(&self, topic: &str) -> Option<WsMessage> {
        let id = {
            let mut ids = self.subscription_ids.lock();
            ids.entry(topic.to_string())
                .or_insert_with(|| {
                    let n = self.next_subscription.fetch_add(1, Ordering::Relaxed);
                    format!("sub-{n}")
                })
                .clone()
        };
        Some(wire(
            StompFrame::new("SUBSCRIBE")
                .header("id", id)
                .header("destination", topic)
                .header("ack", "auto"),
        ))
    }

    fn unsubscribe_frame(&self, topic: &str) -> Option<WsMessage> {
        let id = self.subscription_ids.lock().remove(topic)?;
        Some(wire(StompFrame::new("UNSUBSCRIBE").header("id", id)))
    }

    fn ping_frame(&self) -> Option<WsMessage> {
        Some(WsMessage::text("\n"))
    }

    fn decode(&self, message: WsMessage) -> InboundFrame {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
        };
        let frame = match StompFrame::parse(&text) {
            Ok(Some(frame)) => frame,
            Ok(None) => return InboundFrame::Keepalive,
            Err(e) => return InboundFrame::ProtocolError(e),
        };

        match frame.command.as_str() {
            "CONNECTED" => InboundFrame::Connected,
            "RECEIPT" => InboundFrame::Keepalive,
            "ERROR" => {
                let message = frame.get("message").unwrap_or("server error").to_string();
                if frame.body.is_empty() {
                    InboundFrame::ProtocolError(message)
                } else {
                    InboundFrame::ProtocolError(format!("{message}: {}", frame.body))
                }
            }
            "MESSAGE" => {
                let body = codec::decode_text(frame.body.clone());
                let correlation_id = frame
                    .get("correlation-id")
                    .map(str::to_string)
                    .or_else(|| body.field_str(&self.id_key));
                InboundFrame::Data(Envelope {
                    topic: frame.get("destination").map(str::to_string),
                    correlation_id,
                    body,
                })
            }
            other => InboundFrame::ProtocolError(format!("unexpected frame {other}")),
        }
    }
}
