//! Integration tests for reconnection
//!
//! Backoff strategies on their own, then the client's reconnect loop against
//! a scripted in-memory server under paused time.

mod common;

use chatsocket::traits::reconnect::{
    ExponentialBackoff, FixedDelay, NeverReconnect, ReconnectionStrategy,
};
use chatsocket::transport::ConnectOutcome;
use chatsocket::{
    ClientEvent, ConnectionState, EventKind, JsonFraming, MemoryServer, SocketError,
};
use common::*;
use std::time::Duration;

#[test]
fn test_exponential_backoff_full_sequence() {
    verbose_println!("Testing exponential backoff full sequence...");

    let strategy = ExponentialBackoff::new(
        Duration::from_millis(100),
        Duration::from_secs(10),
        Some(5),
    );

    let expected_delays = [100, 200, 400, 800, 1600];

    for (attempt, &expected_ms) in expected_delays.iter().enumerate() {
        let delay = strategy.next_delay(attempt as u32).unwrap();
        verbose_println!("  Attempt {}: {:?}", attempt, delay);
        assert_eq!(
            delay.as_millis(),
            expected_ms,
            "Unexpected delay at attempt {}",
            attempt
        );
    }

    assert!(
        strategy.next_delay(5).is_none(),
        "Should return None after max attempts"
    );
}

#[test]
fn test_jittered_backoff_stays_bounded() {
    let max = Duration::from_millis(1000);
    let strategy = ExponentialBackoff::new(Duration::from_millis(100), max, None)
        .with_factor(1.7)
        .with_jitter(0.5);

    let mut previous_base = Duration::ZERO;
    for attempt in 0..64 {
        let base = strategy.base_delay(attempt);
        assert!(base >= previous_base, "base delay shrank at attempt {attempt}");
        assert!(base <= max);
        previous_base = base;

        for _ in 0..20 {
            let delay = strategy.next_delay(attempt).unwrap();
            assert!(delay <= max, "attempt {attempt}: {delay:?} above cap");
        }
    }
    assert_eq!(strategy.base_delay(63), max);
}

#[test]
fn test_fixed_and_never_strategies() {
    let fixed = FixedDelay::new(Duration::from_millis(500), Some(3));
    assert_eq!(fixed.next_delay(0), Some(Duration::from_millis(500)));
    assert_eq!(fixed.next_delay(2), Some(Duration::from_millis(500)));
    assert!(fixed.next_delay(3).is_none());

    for attempt in 0..10 {
        assert!(NeverReconnect.next_delay(attempt).is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_reconnected() {
    let server = MemoryServer::new();
    server.refuse_next(3);
    let mut settings = test_settings();
    settings.retry_max = Duration::from_millis(1000);

    let client = memory_builder(&server, settings, JsonFraming::new())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    let first = client.connect().await;
    assert!(matches!(first, Err(SocketError::Transport(_))), "{first:?}");

    let _peer = server.accept().await.unwrap();
    let history = collect_until(&events, EventKind::Reconnected, Duration::from_secs(5)).await;

    let delays: Vec<Duration> = history
        .iter()
        .filter_map(|e| match e {
            ClientEvent::Reconnecting { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    verbose_println!("  Reconnect delays: {:?}", delays);
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400)
        ]
    );
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(
        history.last(),
        Some(&ClientEvent::Reconnected { attempts: 3 })
    );

    assert_eq!(server.attempts(), 4);
    assert_eq!(client.state(), ConnectionState::Open);
    assert_eq!(client.metrics().reconnect_count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_reconnects_with_fresh_backoff() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    client.connect().await.unwrap();
    let peer = server.accept().await.unwrap();
    drop(peer);

    let history = collect_until(&events, EventKind::Reconnected, Duration::from_secs(5)).await;
    assert!(history.contains(&ClientEvent::Close {
        code: 1006,
        reason: "transport ended".into()
    }));
    assert!(history.contains(&ClientEvent::Reconnecting {
        attempt: 1,
        delay: Duration::from_millis(100)
    }));
    assert_eq!(history.last(), Some(&ClientEvent::Reconnected { attempts: 1 }));

    // Counter was reset by the successful open
    let peer = server.accept().await.unwrap();
    peer.close(1011, "restart");
    let reconnecting = next_event(&events, EventKind::Reconnecting, Duration::from_secs(1)).await;
    assert_eq!(
        reconnecting,
        Some(ClientEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(100)
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_stops_reconnecting() {
    let server = MemoryServer::new();
    server.set_refuse_all(true);
    let mut settings = test_settings();
    settings.max_retries = Some(2);

    let client = memory_builder(&server, settings, JsonFraming::new())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    assert!(client.connect().await.is_err());

    let exhausted = wait_for(Duration::from_secs(5), || {
        events.try_iter().find(|e| {
            matches!(e, ClientEvent::Error(SocketError::RetriesExhausted { .. }))
        })
    })
    .await;
    assert_eq!(
        exhausted,
        Some(ClientEvent::Error(SocketError::RetriesExhausted { attempts: 2 }))
    );
    assert_eq!(server.attempts(), 3);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.attempts(), 3);
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_gives_up_after_first_failure() {
    let server = MemoryServer::new();
    server.refuse_next(1);
    let mut settings = test_settings();
    settings.max_retries = Some(0);

    let client = memory_builder(&server, settings, JsonFraming::new())
        .build()
        .await
        .unwrap();
    let events = client.event_stream();

    assert!(client.connect().await.is_err());
    let exhausted = wait_for(Duration::from_secs(1), || {
        events.try_iter().find(|e| {
            matches!(e, ClientEvent::Error(SocketError::RetriesExhausted { .. }))
        })
    })
    .await;
    assert_eq!(
        exhausted,
        Some(ClientEvent::Error(SocketError::RetriesExhausted { attempts: 0 }))
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_stops_reconnecting() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    let mut peer = server.accept().await.unwrap();

    client.disconnect(None, None).await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
    assert_eq!(
        peer.recv().await,
        Some(chatsocket::transport::PeerFrame::Closed {
            code: 1000,
            reason: "client disconnect".into()
        })
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(server.attempts(), 1);

    // connect() again starts over
    client.connect().await.unwrap();
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out_and_retries() {
    let server = MemoryServer::new();
    server.push_outcome(ConnectOutcome::Hang);
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .build()
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let result = client.connect().await;
    assert!(matches!(result, Err(SocketError::Transport(_))), "{result:?}");
    assert!(started.elapsed() >= Duration::from_secs(5));

    let _peer = server.accept().await.unwrap();
    wait_for(Duration::from_secs(1), || client.is_open().then_some(()))
        .await
        .unwrap();
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_is_noop_while_open() {
    let server = MemoryServer::new();
    let client = memory_builder(&server, test_settings(), JsonFraming::new())
        .build()
        .await
        .unwrap();

    client.connect().await.unwrap();
    client.connect().await.unwrap();
    assert_eq!(server.attempts(), 1);
}
