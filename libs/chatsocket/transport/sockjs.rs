//! SockJS XHR-polling fallback transport
//!
//! Used when native WebSockets are unavailable (proxies that strip the
//! upgrade, restricted environments). Speaks the SockJS session protocol:
//!
//! ```text
//! POST {base}/{server}/{session}/xhr       long-poll; answers with frames
//! POST {base}/{server}/{session}/xhr_send  body: JSON array of strings; 204
//!
//! o               session open
//! h               heartbeat
//! a["m1","m2"]    messages
//! c[3000,"Go away!"]  session closed
//! ```

use crate::traits::*;
use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const ABNORMAL_CLOSURE: u16 = 1006;

/// One SockJS frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Parse a response body into frames (one frame per line)
pub fn parse_frames(body: &str) -> std::result::Result<Vec<SockJsFrame>, String> {
    let mut frames = Vec::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let kind = line.chars().next().unwrap_or_default();
        let rest = &line[kind.len_utf8()..];
        let frame = match kind {
            'o' => SockJsFrame::Open,
            'h' => SockJsFrame::Heartbeat,
            'a' => {
                let messages: Vec<String> = serde_json::from_str(rest)
                    .map_err(|e| format!("bad message frame: {e}"))?;
                SockJsFrame::Messages(messages)
            }
            'c' => {
                let value: Value =
                    serde_json::from_str(rest).map_err(|e| format!("bad close frame: {e}"))?;
                let code = value
                    .get(0)
                    .and_then(Value::as_u64)
                    .and_then(|c| u16::try_from(c).ok())
                    .unwrap_or(ABNORMAL_CLOSURE);
                let reason = value
                    .get(1)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                SockJsFrame::Close { code, reason }
            }
            other => return Err(format!("unknown frame type {other:?}")),
        };
        frames.push(frame);
    }
    Ok(frames)
}

/// HTTP base for a SockJS endpoint given a `ws(s)://` or `http(s)://` URL
pub fn http_base(url: &str) -> Result<String> {
    let mut parsed = url::Url::parse(url)
        .map_err(|e| SocketError::Configuration(format!("Invalid URL {url}: {e}")))?;
    let scheme = match parsed.scheme() {
        "ws" | "http" => "http",
        "wss" | "https" => "https",
        other => {
            return Err(SocketError::Configuration(format!(
                "Unsupported scheme for SockJS: {other}"
            )))
        }
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| SocketError::Configuration(format!("Cannot use scheme {scheme}")))?;
    let path = parsed.path().trim_end_matches('/').trim_end_matches("/websocket").to_string();
    parsed.set_path(&path);
    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn session_url(base: &str) -> String {
    let server: u16 = rand::thread_rng().gen_range(0..1000);
    let session = uuid::Uuid::new_v4().simple().to_string();
    format!("{base}/{server:03}/{session}")
}

fn header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (key.parse::<HeaderName>(), value.parse::<HeaderValue>()) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header '{}'", key),
        }
    }
    map
}

/// Opens SockJS sessions over `reqwest`
#[derive(Debug, Clone, Default)]
pub struct SockJsConnector {
    http: reqwest::Client,
}

impl SockJsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl TransportConnector for SockJsConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    async fn connect(&self, url: &str, headers: &Headers) -> Result<TransportLink> {
        let session = session_url(&http_base(url)?);
        let headers = header_map(headers);

        let body = poll(&self.http, &session, &headers).await?;
        match parse_frames(&body).map_err(SocketError::Protocol)?.first() {
            Some(SockJsFrame::Open) => {}
            Some(SockJsFrame::Close { code, reason }) => {
                return Err(SocketError::ConnectionClosed {
                    code: *code,
                    reason: reason.clone(),
                })
            }
            _ => return Err(SocketError::Protocol("SockJS session did not open".into())),
        }
        debug!(%session, "SockJS session open");

        let closed = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(poll_loop(
            self.http.clone(),
            session.clone(),
            headers.clone(),
            Arc::clone(&closed),
            event_tx,
        ));

        let sink = SockJsSink {
            http: self.http.clone(),
            session,
            headers,
            closed,
        };
        Ok(TransportLink::new(Box::new(sink), event_rx, Some(reader)))
    }
}

async fn poll(http: &reqwest::Client, session: &str, headers: &HeaderMap) -> Result<String> {
    let response = http
        .post(format!("{session}/xhr"))
        .headers(headers.clone())
        .send()
        .await
        .map_err(|e| SocketError::Transport(e.to_string()))?;
    if !response.status().is_success() {
        return Err(SocketError::Transport(format!(
            "SockJS poll failed with HTTP {}",
            response.status()
        )));
    }
    response
        .text()
        .await
        .map_err(|e| SocketError::Transport(e.to_string()))
}

async fn poll_loop(
    http: reqwest::Client,
    session: String,
    headers: HeaderMap,
    closed: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while !closed.load(Ordering::Acquire) {
        let frames = match poll(&http, &session, &headers).await {
            Ok(body) => parse_frames(&body),
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: e.to_string(),
                });
                return;
            }
        };
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e));
                continue;
            }
        };

        for frame in frames {
            let event = match frame {
                SockJsFrame::Open => continue,
                SockJsFrame::Heartbeat => TransportEvent::Activity,
                SockJsFrame::Messages(messages) => {
                    for message in messages {
                        if events
                            .send(TransportEvent::Message(WsMessage::Text(message)))
                            .is_err()
                        {
                            return;
                        }
                    }
                    continue;
                }
                SockJsFrame::Close { code, reason } => {
                    closed.store(true, Ordering::Release);
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    return;
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
    }
}

struct SockJsSink {
    http: reqwest::Client,
    session: String,
    headers: HeaderMap,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for SockJsSink {
    async fn send(&mut self, message: WsMessage) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SocketError::Transport("SockJS session closed".into()));
        }
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
        };
        let response = self
            .http
            .post(format!("{}/xhr_send", self.session))
            .headers(self.headers.clone())
            .json(&[text])
            .send()
            .await
            .map_err(|e| SocketError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SocketError::Transport(format!(
                "SockJS send failed with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        // SockJS has no client close frame; the server expires the session
        debug!(code, reason, "Closing SockJS session");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frames() {
        let frames = parse_frames("o\nh\na[\"one\",\"two\"]\nc[3000,\"Go away!\"]\n").unwrap();
        assert_eq!(
            frames,
            vec![
                SockJsFrame::Open,
                SockJsFrame::Heartbeat,
                SockJsFrame::Messages(vec!["one".into(), "two".into()]),
                SockJsFrame::Close { code: 3000, reason: "Go away!".into() },
            ]
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_frames("x").is_err());
        assert!(parse_frames("a[not json").is_err());
    }

    #[test]
    fn test_http_base() {
        assert_eq!(http_base("ws://chat.local:8080/ws").unwrap(), "http://chat.local:8080/ws");
        assert_eq!(
            http_base("wss://chat.example/stomp/websocket").unwrap(),
            "https://chat.example/stomp"
        );
        assert!(http_base("ftp://chat.example").is_err());
    }

    #[test]
    fn test_session_url_shape() {
        let url = session_url("http://h/ws");
        let parts: Vec<&str> = url.trim_start_matches("http://h/ws/").split('/').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 3);
        assert_eq!(parts[1].len(), 32);
    }
}
