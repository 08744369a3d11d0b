//! Integration tests for connection health and session setup
//!
//! Token refresh after auth-related closes, heartbeat expiry, network
//! offline/online signals, transport fallback and the STOMP handshake.

mod common;

use async_trait::async_trait;
use chatsocket::framing::StompFrame;
use chatsocket::transport::{ConnectOutcome, MemoryConnector, PeerFrame, TransportMode};
use chatsocket::{
    ChatSocket, ClientEvent, ConnectionState, EventKind, HeartbeatPolicy, JsonFraming,
    MemoryServer, SocketError, StaticHeaders, StaticToken, StompFraming, TokenProvider,
    TransportKind, WsMessage,
};
use common::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Hands out `token-N`, bumping N on every forced refresh
#[derive(Default)]
struct RotatingToken {
    calls: Mutex<Vec<bool>>,
    generation: Mutex<u32>,
}

#[async_trait]
impl TokenProvider for RotatingToken {
    async fn token(&self, force_refresh: bool) -> Option<String> {
        self.calls.lock().push(force_refresh);
        let mut generation = self.generation.lock();
        if force_refresh || *generation == 0 {
            *generation += 1;
        }
        Some(format!("token-{}", *generation))
    }
}

struct SharedToken(Arc<RotatingToken>);

#[async_trait]
impl TokenProvider for SharedToken {
    async fn token(&self, force_refresh: bool) -> Option<String> {
        self.0.token(force_refresh).await
    }
}

fn authorization(server: &MemoryServer, attempt: usize) -> Option<String> {
    server.headers().get(attempt)?.get("Authorization").cloned()
}

// ---- auth ----

#[tokio::test(start_paused = true)]
async fn test_forbidden_close_refreshes_token_once() {
    let server = MemoryServer::new();
    let tokens = Arc::new(RotatingToken::default());
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .token_provider(SharedToken(Arc::clone(&tokens)))
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    assert_eq!(authorization(&server, 0).as_deref(), Some("Bearer token-1"));

    peer.close(4403, "forbidden");
    let _peer = server.accept().await.unwrap();

    assert_eq!(*tokens.calls.lock(), vec![false, true]);
    assert_eq!(authorization(&server, 1).as_deref(), Some("Bearer token-2"));
}

#[tokio::test(start_paused = true)]
async fn test_rejection_during_session_setup_refreshes_token() {
    let server = MemoryServer::new();
    server.push_outcome(ConnectOutcome::Reject {
        code: 4403,
        reason: "forbidden".into(),
    });
    let tokens = Arc::new(RotatingToken::default());
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .token_provider(SharedToken(Arc::clone(&tokens)))
        .build()
        .await
        .unwrap();

    let first = client.connect().await;
    assert_eq!(
        first,
        Err(SocketError::ConnectionClosed {
            code: 4403,
            reason: "forbidden".into()
        })
    );

    let _peer = server.accept().await.unwrap();
    assert_eq!(*tokens.calls.lock(), vec![false, true]);
    assert_eq!(authorization(&server, 0).as_deref(), Some("Bearer token-1"));
    assert_eq!(authorization(&server, 1).as_deref(), Some("Bearer token-2"));
}

#[tokio::test(start_paused = true)]
async fn test_non_auth_rejection_keeps_token() {
    let server = MemoryServer::new();
    server.push_outcome(ConnectOutcome::Reject {
        code: 1011,
        reason: "busy".into(),
    });
    let tokens = Arc::new(RotatingToken::default());
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .token_provider(SharedToken(Arc::clone(&tokens)))
        .build()
        .await
        .unwrap();

    assert!(client.connect().await.is_err());
    let _peer = server.accept().await.unwrap();
    assert_eq!(*tokens.calls.lock(), vec![false, false]);
}

#[tokio::test(start_paused = true)]
async fn test_ordinary_close_keeps_token() {
    let server = MemoryServer::new();
    let tokens = Arc::new(RotatingToken::default());
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .token_provider(SharedToken(Arc::clone(&tokens)))
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    peer.close(1001, "going away");
    let _peer = server.accept().await.unwrap();

    assert_eq!(*tokens.calls.lock(), vec![false, false]);
    assert_eq!(authorization(&server, 1).as_deref(), Some("Bearer token-1"));
}

#[tokio::test(start_paused = true)]
async fn test_token_in_query_and_extra_headers() {
    let server = MemoryServer::new();
    let mut settings = test_settings();
    settings.token_in_query = true;
    settings.token_param = "access_token".into();

    let mut headers = HashMap::new();
    headers.insert("X-Client".to_string(), "tests".to_string());

    let client = memory_builder(&server, settings, JsonFraming::new())
        .token_provider(StaticToken::new("abc"))
        .headers(StaticHeaders(headers))
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    assert_eq!(server.urls(), vec!["ws://chat.test/ws?access_token=abc"]);
    let sent = &server.headers()[0];
    assert_eq!(sent.get("X-Client").map(String::as_str), Some("tests"));
    assert!(!sent.contains_key("Authorization"));
}

// ---- heartbeat ----

fn fast_heartbeat() -> HeartbeatPolicy {
    HeartbeatPolicy::new(Duration::from_secs(10))
        .with_idle_threshold(Duration::from_secs(9))
        .with_max_missed(2)
}

#[tokio::test(start_paused = true)]
async fn test_silent_server_is_pinged_then_dropped() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .heartbeat(fast_heartbeat())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    client.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    let opened = tokio::time::Instant::now();

    assert_eq!(peer.recv_json().await, Some(serde_json::json!({ "type": "ping" })));
    assert_eq!(peer.recv_json().await, Some(serde_json::json!({ "type": "ping" })));
    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed {
            code: 4001,
            reason: "heartbeat timeout".into()
        })
    );
    let elapsed = opened.elapsed();
    verbose_println!("  Force-closed after {:?}", elapsed);
    assert!(elapsed >= Duration::from_secs(30) && elapsed < Duration::from_secs(31));

    let history = collect_until(&events, EventKind::Close, Duration::from_secs(1)).await;
    let misses: Vec<u32> = history
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Heartbeat { missed } => Some(*missed),
            _ => None,
        })
        .collect();
    assert_eq!(misses, vec![1, 2]);

    // A heartbeat timeout reconnects
    let _peer = server.accept().await.unwrap();
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_inbound_traffic_keeps_connection_alive() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .heartbeat(fast_heartbeat())
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();

    for _ in 0..12 {
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(peer.keepalive());
    }

    assert!(peer.drain().is_empty(), "no pings while traffic flows");
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_client_slows_heartbeat() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .heartbeat(fast_heartbeat())
        .build()
        .await
        .unwrap();

    client.set_visible(false);
    client.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();
    let opened = tokio::time::Instant::now();

    assert_eq!(peer.recv_json().await, Some(serde_json::json!({ "type": "ping" })));
    let elapsed = opened.elapsed();
    assert!(elapsed >= Duration::from_secs(20), "first ping after {elapsed:?}");
}

// ---- connectivity ----

#[tokio::test(start_paused = true)]
async fn test_offline_closes_and_online_reconnects_immediately() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    client.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();

    client.set_online(false);
    assert_eq!(
        peer.recv().await,
        Some(PeerFrame::Closed {
            code: 4000,
            reason: "offline".into()
        })
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(server.attempts(), 1, "no reconnect while offline");
    assert!(!client.send("queued while offline"));

    let went_online = tokio::time::Instant::now();
    client.set_online(true);
    let mut peer = server.accept().await.unwrap();
    assert!(went_online.elapsed() < Duration::from_millis(50));
    assert_eq!(
        peer.recv_message().await,
        Some(WsMessage::text("queued while offline"))
    );

    // Skip the first open, collect up to the second
    next_event(&events, EventKind::Open, Duration::from_secs(1))
        .await
        .unwrap();
    let history = collect_until(&events, EventKind::Open, Duration::from_secs(1)).await;
    assert_eq!(history.last().map(ClientEvent::kind), Some(EventKind::Open));
    assert!(history.contains(&ClientEvent::Close {
        code: 4000,
        reason: "offline".into()
    }));
    assert!(history.contains(&ClientEvent::Reconnecting {
        attempt: 1,
        delay: Duration::ZERO
    }));
    assert_eq!(
        next_event(&events, EventKind::Reconnected, Duration::from_secs(1)).await,
        Some(ClientEvent::Reconnected { attempts: 1 })
    );
    assert_eq!(client.metrics().reconnect_count, 1);
}

// ---- transport selection ----

#[tokio::test(start_paused = true)]
async fn test_native_failure_falls_back_once() {
    let native = MemoryServer::new();
    native.set_refuse_all(true);
    let fallback = MemoryServer::new();

    let client = ChatSocket::builder()
        .settings(test_settings())
        .framing(JsonFraming::new())
        .transport_mode(TransportMode::Auto)
        .native_connector(native.connector())
        .fallback_connector(MemoryConnector::new(fallback.clone(), TransportKind::Fallback))
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    client.connect().await.unwrap();
    let peer = fallback.accept().await.unwrap();
    assert_eq!(peer.kind(), TransportKind::Fallback);
    assert_eq!(native.attempts(), 1);

    let open = next_event(&events, EventKind::Open, Duration::from_secs(1)).await;
    assert_eq!(
        open,
        Some(ClientEvent::Open {
            transport: TransportKind::Fallback
        })
    );

    // Later reconnects stay on the fallback
    drop(peer);
    let _peer = fallback.accept().await.unwrap();
    assert_eq!(native.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_native_starts_on_fallback() {
    let server = MemoryServer::new();
    let client = ChatSocket::builder()
        .settings(test_settings())
        .framing(JsonFraming::new())
        .native_connector(MemoryConnector::new(server.clone(), TransportKind::Native).unsupported())
        .fallback_connector(MemoryConnector::new(server.clone(), TransportKind::Fallback))
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    assert_eq!(peer.kind(), TransportKind::Fallback);
    assert_eq!(server.attempts(), 1);
}

// ---- STOMP ----

fn stomp_frame(message: &WsMessage) -> StompFrame {
    StompFrame::parse(message.as_text().unwrap()).unwrap().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_stomp_session_waits_for_connected() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), StompFraming::new("/app/chat"))
        .token_provider(StaticToken::new("abc"))
        .build()
        .await
        .unwrap();

    let connecting = client.clone();
    let connected = tokio::spawn(async move { connecting.connect().await });

    let mut peer = server.accept().await.unwrap();
    assert!(!server.headers()[0].contains_key("Authorization"));

    let connect = stomp_frame(&peer.recv_message().await.unwrap());
    assert_eq!(connect.command, "CONNECT");
    assert_eq!(connect.get("accept-version"), Some("1.2"));
    assert_eq!(connect.get("Authorization"), Some("Bearer abc"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Connecting);
    assert!(!connected.is_finished());

    assert!(peer.send_text("CONNECTED\nversion:1.2\n\n\0"));
    connected.await.unwrap().unwrap();
    assert!(client.is_open());

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let _sub = client.subscribe("/topic/room.1", move |payload| {
        sink.lock().push(payload.clone());
    });
    let subscribe = stomp_frame(&peer.recv_message().await.unwrap());
    assert_eq!(subscribe.command, "SUBSCRIBE");
    assert_eq!(subscribe.get("destination"), Some("/topic/room.1"));
    let sub_id = subscribe.get("id").unwrap().to_string();

    let message = StompFrame::new("MESSAGE")
        .header("destination", "/topic/room.1")
        .header("subscription", sub_id)
        .header("message-id", "m-1")
        .body(r#"{"text":"hi"}"#);
    assert!(peer.send_text(message.to_wire()));
    wait_for(Duration::from_secs(1), || (!received.lock().is_empty()).then_some(()))
        .await
        .unwrap();
    assert_eq!(
        received.lock()[0],
        chatsocket::Payload::Json(serde_json::json!({ "text": "hi" }))
    );

    client.disconnect(None, None).await.unwrap();
    let goodbye = stomp_frame(&peer.recv_message().await.unwrap());
    assert_eq!(goodbye.command, "DISCONNECT");
}

#[tokio::test(start_paused = true)]
async fn test_stomp_handshake_timeout_retries() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), StompFraming::new("/app/chat"))
        .build()
        .await
        .unwrap();

    let result = client.connect().await;
    assert!(matches!(result, Err(SocketError::Transport(_))), "{result:?}");
    assert_eq!(server.attempts(), 1);

    let mut first = server.accept().await.unwrap();
    assert_eq!(
        first.recv().await.map(|frame| matches!(frame, PeerFrame::Message(_))),
        Some(true),
        "CONNECT frame"
    );
    assert_eq!(
        first.recv().await,
        Some(PeerFrame::Closed {
            code: 1000,
            reason: "handshake timeout".into()
        })
    );

    let _second = server.accept().await.unwrap();
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stomp_error_frame_is_reported() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), StompFraming::new("/app/chat"))
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    let connecting = client.clone();
    let connected = tokio::spawn(async move { connecting.connect().await });
    let peer = server.accept().await.unwrap();
    assert!(peer.send_text("CONNECTED\nversion:1.2\n\n\0"));
    connected.await.unwrap().unwrap();

    let error = StompFrame::new("ERROR").header("message", "bad destination");
    assert!(peer.send_text(error.to_wire()));
    let event = next_event(&events, EventKind::Error, Duration::from_secs(1)).await;
    assert_eq!(
        event,
        Some(ClientEvent::Error(SocketError::Protocol("bad destination".into())))
    );
}
