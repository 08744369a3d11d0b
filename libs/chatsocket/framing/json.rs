//! JSON envelope framing
//!
//! The plain WebSocket dialect: every frame is one JSON object.
//!
//! ```text
//! publish      {"type":"publish","topic":"room.1","data":{...}}
//! request      {...applicationFields, "id":"<uuid>"}
//! subscribe    {"type":"subscribe","topic":"room.1"}     (builder is injectable)
//! unsubscribe  {"type":"unsubscribe","topic":"room.1"}   (builder is injectable)
//! ping         {"type":"ping"}
//! ```
//!
//! Inbound objects carrying a `topic` (or `channel`) field are routed to the
//! topic registry; objects carrying an `id` are offered to the correlator.

use crate::core::codec;
use crate::traits::{
    Envelope, Framing, InboundFrame, JsonPongDetector, Payload, PongDetector, WsMessage,
};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Builds the control payload for a topic (subscribe / unsubscribe)
pub type ControlFrameBuilder = Arc<dyn Fn(&str) -> Payload + Send + Sync>;

pub struct JsonFraming {
    type_key: String,
    topic_keys: Vec<String>,
    data_key: String,
    id_key: String,
    subscribe_builder: Option<ControlFrameBuilder>,
    unsubscribe_builder: Option<ControlFrameBuilder>,
    ping: Option<Payload>,
    pong_detector: Box<dyn PongDetector>,
}

fn control_frame(kind: &'static str) -> ControlFrameBuilder {
    Arc::new(move |topic: &str| {
        Payload::Json(serde_json::json!({ "type": kind, "topic": topic }))
    })
}

impl JsonFraming {
    pub fn new() -> Self {
        Self {
            type_key: "type".to_string(),
            topic_keys: vec!["topic".to_string(), "channel".to_string()],
            data_key: "data".to_string(),
            id_key: "id".to_string(),
            subscribe_builder: Some(control_frame("subscribe")),
            unsubscribe_builder: Some(control_frame("unsubscribe")),
            ping: Some(Payload::Json(serde_json::json!({ "type": "ping" }))),
            pong_detector: Box::new(JsonPongDetector::new("type", "pong")),
        }
    }

    /// Key that carries the correlation id
    pub fn with_id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = key.into();
        self
    }

    /// Keys checked, in order, for the topic of an inbound message
    ///
    /// The first key is also used when publishing.
    pub fn with_topic_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if !keys.is_empty() {
            self.topic_keys = keys;
        }
        self
    }

    pub fn with_type_key(mut self, key: impl Into<String>) -> Self {
        self.type_key = key.into();
        self
    }

    pub fn with_data_key(mut self, key: impl Into<String>) -> Self {
        self.data_key = key.into();
        self
    }

    pub fn with_subscribe_frame<F>(mut self, builder: F) -> Self
    where
        F: Fn(&str) -> Payload + Send + Sync + 'static,
    {
        self.subscribe_builder = Some(Arc::new(builder));
        self
    }

    pub fn with_unsubscribe_frame<F>(mut self, builder: F) -> Self
    where
        F: Fn(&str) -> Payload + Send + Sync + 'static,
    {
        self.unsubscribe_builder = Some(Arc::new(builder));
        self
    }

    /// Servers without server-side subscriptions: never send (un)subscribe frames
    pub fn without_control_frames(mut self) -> Self {
        self.subscribe_builder = None;
        self.unsubscribe_builder = None;
        self
    }

    /// Heartbeat probe; `None` disables probing (idle checks still run)
    pub fn with_ping(mut self, ping: Option<Payload>) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_pong_detector(mut self, detector: impl PongDetector + 'static) -> Self {
        self.pong_detector = Box::new(detector);
        self
    }

    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    fn topic_of(&self, payload: &Payload) -> Option<String> {
        self.topic_keys.iter().find_map(|k| payload.field_str(k))
    }
}

impl Default for JsonFraming {
    fn default() -> Self {
        Self::new()
    }
}

fn payload_to_value(payload: &Payload) -> Value {
    match payload {
        Payload::Json(value) => value.clone(),
        Payload::Text(text) => Value::String(text.clone()),
        Payload::Binary(data) => Value::String(String::from_utf8_lossy(data).into_owned()),
    }
}

impl Framing for JsonFraming {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode_send(&self, payload: &Payload) -> WsMessage {
        codec::encode(payload)
    }

    fn encode_publish(&self, topic: &str, payload: &Payload) -> WsMessage {
        let mut frame = Map::new();
        frame.insert(self.type_key.clone(), Value::String("publish".into()));
        frame.insert(self.topic_keys[0].clone(), Value::String(topic.into()));
        frame.insert(self.data_key.clone(), payload_to_value(payload));
        codec::encode_value(&frame)
    }

    fn encode_request(&self, payload: &Payload, correlation_id: &str) -> WsMessage {
        let id = Value::String(correlation_id.to_string());
        let frame = match payload_to_value(payload) {
            Value::Object(mut fields) => {
                fields.insert(self.id_key.clone(), id);
                fields
            }
            other => {
                let mut fields = Map::new();
                fields.insert(self.data_key.clone(), other);
                fields.insert(self.id_key.clone(), id);
                fields
            }
        };
        codec::encode_value(&frame)
    }

    fn subscribe_frame(&self, topic: &str) -> Option<WsMessage> {
        self.subscribe_builder
            .as_ref()
            .map(|build| codec::encode(&build(topic)))
    }

    fn unsubscribe_frame(&self, topic: &str) -> Option<WsMessage> {
        self.unsubscribe_builder
            .as_ref()
            .map(|build| codec::encode(&build(topic)))
    }

    fn ping_frame(&self) -> Option<WsMessage> {
        self.ping.as_ref().map(codec::encode)
    }

    fn decode(&self, message: WsMessage) -> InboundFrame {
        let body = codec::decode(message);
        if self.pong_detector.is_pong(&body) {
            return InboundFrame::Keepalive;
        }
        InboundFrame::Data(Envelope {
            topic: self.topic_of(&body),
            correlation_id: body.field_str(&self.id_key),
            body,
        })
    }
}
