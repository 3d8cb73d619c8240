//! End-to-end tests over real loopback sockets

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use roverlink::{ConnectionManager, ConnectionState, Endpoint, LinkConfig, LinkEvent, TransportKind};

const WAIT: Duration = Duration::from_secs(5);

fn fast_config(transport: TransportKind) -> LinkConfig {
    LinkConfig {
        transport,
        backoff_base: Duration::from_millis(50),
        backoff_cap: Duration::from_millis(200),
        connect_timeout: Duration::from_secs(2),
        ..LinkConfig::default()
    }
}

async fn next_message(events: &mut mpsc::UnboundedReceiver<LinkEvent>) -> String {
    loop {
        match timeout(WAIT, events.recv()).await.unwrap().unwrap() {
            LinkEvent::Message(text) => return text,
            LinkEvent::Status(_) => continue,
        }
    }
}

async fn wait_connected(link: &ConnectionManager) {
    let mut state = link.subscribe_state();
    timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Connected))
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_stream_link_survives_server_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());

    let (tx, mut events) = mpsc::unbounded_channel();
    let link = ConnectionManager::new(fast_config(TransportKind::Stream), tx);
    link.start(endpoint).await;

    // First session: exchange a line each way, then hang up
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    wait_connected(&link).await;
    link.send("{\"armed\":true}").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"armed\":true}");

    write_half.write_all(b"speed 3.2\r\n").await.unwrap();
    assert_eq!(next_message(&mut events).await, "speed 3.2");
    drop(lines);
    drop(write_half);

    // The manager reconnects on its own
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut lines = BufReader::new(stream).lines();
    wait_connected(&link).await;

    link.send("{\"armed\":false}").await.unwrap();
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "{\"armed\":false}");

    link.stop().await;
    assert_eq!(link.metrics().snapshot().connections_established, 2);
}

#[tokio::test]
async fn test_stream_queue_flushes_when_vehicle_appears() {
    // Reserve a port, then leave it closed so the first attempts are refused
    let reserved = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = reserved.local_addr().unwrap();
    drop(reserved);

    let (tx, _events) = mpsc::unbounded_channel::<LinkEvent>();
    let link = ConnectionManager::new(fast_config(TransportKind::Stream), tx);
    link.start(Endpoint::from(addr)).await;

    link.send("first").await.unwrap();
    link.send("second").await.unwrap();

    let listener = TcpListener::bind(addr).await.unwrap();
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut lines = BufReader::new(stream).lines();

    assert_eq!(lines.next_line().await.unwrap().unwrap(), "first");
    assert_eq!(lines.next_line().await.unwrap().unwrap(), "second");

    link.stop().await;
}

#[tokio::test]
async fn test_framed_link_exchanges_and_recovers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());

    let (tx, mut events) = mpsc::unbounded_channel();
    let link = ConnectionManager::new(fast_config(TransportKind::Framed), tx);
    link.start(endpoint).await;

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    wait_connected(&link).await;

    ws.send(Message::Text("heading 270".into())).await.unwrap();
    assert_eq!(next_message(&mut events).await, "heading 270");

    link.send("{\"throttle\":55}").await.unwrap();
    let received = loop {
        match timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap() {
            Message::Text(text) => break text,
            _ => continue,
        }
    };
    assert_eq!(received, "{\"throttle\":55}");

    ws.close(None).await.unwrap();
    drop(ws);

    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let _ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    wait_connected(&link).await;

    link.stop().await;
    assert!(!link.is_connected());
}

#[tokio::test]
async fn test_stop_completes_while_vehicle_stops_reading() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = Endpoint::from(listener.local_addr().unwrap());

    let (tx, _events) = mpsc::unbounded_channel::<LinkEvent>();
    let link = Arc::new(ConnectionManager::new(fast_config(TransportKind::Stream), tx));
    link.start(endpoint).await;

    // Accept and hold the socket without ever reading from it
    let (_stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    wait_connected(&link).await;

    let sender = {
        let link = link.clone();
        tokio::spawn(async move { link.send("x".repeat(64 << 20)).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;

    timeout(WAIT, link.stop())
        .await
        .expect("stop() blocked behind a write the vehicle never reads");
    assert_eq!(link.state(), ConnectionState::Disconnected);
    timeout(WAIT, sender).await.unwrap().unwrap().unwrap();
}
