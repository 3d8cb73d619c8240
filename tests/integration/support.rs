//! Shared test fixtures: an in-memory connector whose behaviour each test
//! scripts, plus helpers for observing the manager.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use roverlink::error::{LinkError, LinkResult};
use roverlink::link::{OutgoingMessage, Payload};
use roverlink::transport::{Connector, Inbound, TransportKind, TransportSink, TransportSource};
use roverlink::{ConnectionManager, Endpoint, LinkConfig, LinkEvent};

/// What the next `open` does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accept,
    Refuse,
    /// Accept, but no write ever completes
    AcceptStalled,
    /// Accept after the given delay
    Hang(Duration),
}

/// Remote end of one accepted in-memory transport
pub struct Peer {
    inbound: mpsc::UnboundedSender<LinkResult<Inbound>>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Peer {
    pub fn say(&self, text: &str) {
        let _ = self.inbound.send(Ok(Inbound::Message(text.to_string())));
    }

    pub fn close(&self, reason: &str) {
        let _ = self.inbound.send(Ok(Inbound::Closed {
            reason: reason.to_string(),
        }));
    }

    /// Make every further write on this transport fail
    pub fn break_writes(&self) {
        self.fail_writes.store(true, Ordering::Release);
    }

    /// Make every further write on this transport hang
    pub fn stall_writes(&self) {
        self.stall_writes.store(true, Ordering::Release);
    }

    /// Whether the manager closed this transport
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Connector driven by a per-test script; unscripted attempts use `fallback`
pub struct ScriptedConnector {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    attempts: Mutex<Vec<Instant>>,
    written: Arc<Mutex<Vec<String>>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ScriptedConnector {
    pub fn new(
        script: impl IntoIterator<Item = Step>,
        fallback: Step,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            written: Arc::new(Mutex::new(Vec::new())),
            peers,
        });
        (connector, peer_rx)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        Self::new([], Step::Refuse)
    }

    /// Instants at which `open` was called
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Every payload successfully written, across all connections
    pub fn written(&self) -> Vec<String> {
        self.written.lock().clone()
    }
}

impl ScriptedConnector {
    fn accept(&self, stalled: bool) -> (Box<dyn TransportSink>, Box<dyn TransportSource>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));
        let stall_writes = Arc::new(AtomicBool::new(stalled));
        let closed = Arc::new(AtomicBool::new(false));
        let _ = self.peers.send(Peer {
            inbound,
            fail_writes: fail_writes.clone(),
            stall_writes: stall_writes.clone(),
            closed: closed.clone(),
        });
        (
            Box::new(MemorySink {
                written: self.written.clone(),
                fail_writes,
                stall_writes,
                closed,
            }),
            Box::new(MemorySource { rx }),
        )
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        endpoint: &Endpoint,
    ) -> LinkResult<(Box<dyn TransportSink>, Box<dyn TransportSource>)> {
        self.attempts.lock().push(Instant::now());
        let step = self.script.lock().pop_front().unwrap_or(self.fallback);

        match step {
            Step::Refuse => Err(LinkError::Connect {
                endpoint: endpoint.clone(),
                reason: "connection refused".to_string(),
            }),
            Step::Accept => Ok(self.accept(false)),
            Step::AcceptStalled => Ok(self.accept(true)),
            Step::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.accept(false))
            }
        }
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Framed
    }
}

struct MemorySink {
    written: Arc<Mutex<Vec<String>>>,
    fail_writes: Arc<AtomicBool>,
    stall_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSink for MemorySink {
    async fn transmit(&mut self, message: &OutgoingMessage) -> LinkResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe").into());
        }
        if self.stall_writes.load(Ordering::Acquire) {
            return std::future::pending().await;
        }
        let text = match &message.payload {
            Payload::Text(text) => text.clone(),
            Payload::Binary(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        };
        self.written.lock().push(text);
        Ok(())
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<LinkResult<Inbound>>,
}

#[async_trait]
impl TransportSource for MemorySource {
    async fn next(&mut self) -> LinkResult<Inbound> {
        match self.rx.recv().await {
            Some(item) => item,
            None => Ok(Inbound::Closed {
                reason: "peer gone".to_string(),
            }),
        }
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::new("10.42.0.1", 5000)
}

/// Manager with the reference policy over `connector`
pub fn manager(
    connector: Arc<ScriptedConnector>,
) -> (ConnectionManager, mpsc::UnboundedReceiver<LinkEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let manager = ConnectionManager::with_connector(LinkConfig::default(), connector, tx);
    (manager, rx)
}

/// Poll `condition` every few milliseconds of (possibly paused) time
pub async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(600);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Let queued events reach the subscriber, then collect the status texts
pub async fn statuses(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<String> {
    settle().await;
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let LinkEvent::Status(text) = event {
            out.push(text);
        }
    }
    out
}

/// Give spawned tasks a chance to run without advancing time
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
