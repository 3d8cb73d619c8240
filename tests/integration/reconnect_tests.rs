//! Reconnect, backoff and lifecycle tests against the scripted connector

use std::time::Duration;
use tokio::time::Instant;

use roverlink::ConnectionState;

use crate::support::{self, ScriptedConnector, Step};

/// Unreachable vehicle: retries follow 1, 2, 4, 8, 16, 30, 30 seconds
#[tokio::test(start_paused = true)]
async fn test_unreachable_endpoint_backs_off_to_cap() {
    let (connector, _peers) = ScriptedConnector::refusing();
    let (link, mut events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    support::wait_until("eight attempts", || connector.attempt_count() >= 8).await;
    support::settle().await;
    link.stop().await;

    let attempts = connector.attempts();
    let gaps: Vec<u64> = attempts
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 4, 8, 16, 30, 30]);

    let statuses = support::statuses(&mut events).await;
    assert_eq!(statuses[0], "Connecting...");
    assert!(statuses[1].starts_with("Connection failed: "));
    assert_eq!(statuses[2], "Reconnecting in 1s...");
    assert!(statuses.contains(&"Reconnecting in 16s...".to_string()));
    assert!(statuses.contains(&"Reconnecting in 30s...".to_string()));
    assert_eq!(statuses.last().map(String::as_str), Some("Stopped"));

    let metrics = link.metrics().snapshot();
    assert_eq!(metrics.connect_attempts, 8);
    assert_eq!(metrics.connect_failures, 8);
    assert_eq!(metrics.connections_established, 0);
}

/// Remote close: status narrates the reason and a new attempt follows after
/// the base delay
#[tokio::test(start_paused = true)]
async fn test_remote_close_reconnects_at_base_delay() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept, Step::Accept], Step::Refuse);
    let (link, mut events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    let first = peers.recv().await.unwrap();
    let mut state = link.subscribe_state();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    first.say("battery 87%");
    first.close("server restart");
    let closed_at = Instant::now();

    let _second = peers.recv().await.unwrap();
    let waited = Instant::now() - closed_at;
    assert!(waited >= Duration::from_secs(1) && waited < Duration::from_millis(1100));

    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();
    assert!(link.is_connected());

    let mut statuses = Vec::new();
    let mut messages = Vec::new();
    support::settle().await;
    while let Ok(event) = events.try_recv() {
        match event {
            roverlink::LinkEvent::Status(text) => statuses.push(text),
            roverlink::LinkEvent::Message(text) => messages.push(text),
        }
    }
    assert_eq!(messages, vec!["battery 87%"]);
    assert_eq!(
        statuses,
        vec![
            "Connecting...",
            "Connected",
            "Closed: server restart",
            "Reconnecting in 1s...",
            "Connecting...",
            "Connected",
        ]
    );
}

/// stop() while a retry is armed: no further attempts, ever
#[tokio::test(start_paused = true)]
async fn test_stop_cancels_armed_retry() {
    let (connector, _peers) = ScriptedConnector::refusing();
    let (link, mut events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    support::wait_until("first failure", || connector.attempt_count() == 1).await;
    support::settle().await;
    link.stop().await;

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(link.state(), ConnectionState::Disconnected);

    let statuses = support::statuses(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("Stopped"));
}

/// stop() on an open link closes it and suppresses reconnection
#[tokio::test(start_paused = true)]
async fn test_stop_while_connected() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept], Step::Accept);
    let (link, _events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    let _peer = peers.recv().await.unwrap();
    link.subscribe_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    link.stop().await;
    assert!(!link.is_connected());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempt_count(), 1);
    assert_eq!(link.metrics().snapshot().disconnects, 1);
}

/// A second start() while connected is a no-op
#[tokio::test(start_paused = true)]
async fn test_start_is_idempotent_while_active() {
    let (connector, mut peers) = ScriptedConnector::new([Step::Accept], Step::Accept);
    let (link, mut events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    let _peer = peers.recv().await.unwrap();
    link.subscribe_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    link.start(support::endpoint()).await;
    support::settle().await;

    assert_eq!(connector.attempt_count(), 1);
    assert!(link.is_connected());
    let statuses = support::statuses(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("Already connected."));
}

/// start() after stop() clears manual close and connects again
#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let (connector, mut peers) = ScriptedConnector::new([], Step::Accept);
    let (link, _events) = support::manager(connector.clone());
    let mut state = link.subscribe_state();

    link.start(support::endpoint()).await;
    let _first = peers.recv().await.unwrap();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    link.stop().await;
    link.start(support::endpoint()).await;
    let _second = peers.recv().await.unwrap();
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    assert_eq!(connector.attempt_count(), 2);
}

/// A successful connect resets the delay sequence
#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_connect() {
    let (connector, mut peers) = ScriptedConnector::new(
        [Step::Refuse, Step::Refuse, Step::Refuse, Step::Accept],
        Step::Refuse,
    );
    let (link, _events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    let peer = peers.recv().await.unwrap();
    link.subscribe_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();
    assert_eq!(link.next_retry_delay().await, Duration::from_secs(1));

    peer.close("bye");
    support::wait_until("retry after close", || connector.attempt_count() == 5).await;

    let attempts = connector.attempts();
    assert_eq!((attempts[4] - attempts[3]).as_secs(), 1);
    link.stop().await;
}

/// reconnect(): immediate attempt without resetting backoff
#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_keeps_backoff() {
    let (connector, _peers) = ScriptedConnector::refusing();
    let (link, mut events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    support::wait_until("first failure", || connector.attempt_count() == 1).await;
    support::settle().await;
    assert_eq!(link.next_retry_delay().await, Duration::from_secs(2));

    link.reconnect().await;
    support::wait_until("manual attempt", || connector.attempt_count() == 2).await;
    support::settle().await;

    let attempts = connector.attempts();
    assert!(attempts[1] - attempts[0] < Duration::from_secs(1));

    let statuses = support::statuses(&mut events).await;
    let requested = statuses
        .iter()
        .position(|s| s == "Manual reconnect requested...")
        .unwrap();
    assert_eq!(statuses[requested + 1], "Connecting...");
    assert_eq!(statuses[requested + 3], "Reconnecting in 2s...");

    link.stop().await;
}

/// reconnect() is refused after stop() and before any endpoint is known
#[tokio::test(start_paused = true)]
async fn test_manual_reconnect_guards() {
    let (connector, _peers) = ScriptedConnector::refusing();
    let (link, mut events) = support::manager(connector.clone());

    link.reconnect().await;
    let statuses = support::statuses(&mut events).await;
    assert_eq!(statuses.last().map(String::as_str), Some("No endpoint set."));

    link.start(support::endpoint()).await;
    link.stop().await;
    link.reconnect().await;
    let statuses = support::statuses(&mut events).await;
    assert_eq!(
        statuses.last().map(String::as_str),
        Some("Manual close: not reconnecting")
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(connector.attempt_count() <= 1);
}

/// Dropping the manager stops retrying
#[tokio::test(start_paused = true)]
async fn test_drop_stops_retries() {
    let (connector, _peers) = ScriptedConnector::refusing();
    let (link, _events) = support::manager(connector.clone());

    link.start(support::endpoint()).await;
    support::wait_until("first failure", || connector.attempt_count() == 1).await;
    support::settle().await;
    drop(link);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempt_count(), 1);
}

/// Independent managers do not share state
#[tokio::test(start_paused = true)]
async fn test_managers_are_independent() {
    let (refusing, _) = ScriptedConnector::refusing();
    let (accepting, mut peers) = ScriptedConnector::new([], Step::Accept);
    let (down, _) = support::manager(refusing.clone());
    let (up, _) = support::manager(accepting.clone());

    down.start(support::endpoint()).await;
    up.start(support::endpoint()).await;
    let _peer = peers.recv().await.unwrap();
    up.subscribe_state()
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .unwrap();

    down.send("queued").await.unwrap();
    up.send("live").await.unwrap();

    assert!(!down.is_connected());
    assert_eq!(down.queued().await, 1);
    assert_eq!(accepting.written(), vec!["live"]);
    assert!(refusing.written().is_empty());
}
