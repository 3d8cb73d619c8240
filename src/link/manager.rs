//! Connection manager
//!
//! Owns the link state machine. Every transition, send, flush and stop runs
//! while holding one async mutex over [`LinkInner`], so transitions are
//! totally ordered and a send can never overtake a reconnect flush.
//!
//! Connect attempts, the read loop and the reconnect timer are independent
//! tasks. Each attempt bumps a generation counter; a task that wakes up with a
//! stale generation discards its result instead of touching the live link.
//!
//! Writes hold the mutex, so every write is bounded by the write timeout and
//! is interrupted by the stop signal that `stop()` and `Drop` raise before
//! they take the lock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backoff::BackoffScheduler;
use super::dispatcher::{EventDispatcher, LinkSubscriber};
use super::metrics::LinkMetrics;
use super::queue::{OutgoingMessage, OutgoingQueue, Payload};
use super::state::{ConnectionState, DisconnectCause};
use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::transport::{connector_for, Connector, Endpoint, Inbound, TransportSink, TransportSource};

/// Upper bound on a graceful transport close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Resilient client for one logical link to a vehicle
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: LinkConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<LinkInner>,
    state_tx: watch::Sender<ConnectionState>,
    events: EventDispatcher,
    metrics: Arc<LinkMetrics>,
    next_seq: AtomicU64,
    /// Bumped by `stop()` and `Drop` to interrupt in-flight writes and reads
    stop_tx: watch::Sender<u64>,
    /// Set once the owning manager is dropped
    detached: AtomicBool,
}

/// Mutable link state, only touched under `Shared::inner`
struct LinkInner {
    endpoint: Option<Endpoint>,
    manual_close: bool,
    generation: u64,
    sink: Option<GuardedSink>,
    attempt: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    scheduler: BackoffScheduler,
    queue: OutgoingQueue,
}

impl ConnectionManager {
    /// Create a manager using the transport variant selected in `config`.
    ///
    /// Must be called within a tokio runtime.
    pub fn new<S: LinkSubscriber>(config: LinkConfig, subscriber: S) -> Self {
        let connector = connector_for(&config);
        Self::with_connector(config, connector, subscriber)
    }

    /// Create a manager with an explicit connector
    pub fn with_connector<S: LinkSubscriber>(
        config: LinkConfig,
        connector: Arc<dyn Connector>,
        subscriber: S,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (stop_tx, _) = watch::channel(0);
        let inner = LinkInner {
            endpoint: None,
            manual_close: false,
            generation: 0,
            sink: None,
            attempt: None,
            reader: None,
            scheduler: BackoffScheduler::new(config.backoff_base, config.backoff_cap),
            queue: OutgoingQueue::new(config.queue_capacity),
        };

        info!(
            transport = %connector.kind(),
            queue_capacity = config.queue_capacity,
            backoff_base_ms = config.backoff_base.as_millis() as u64,
            backoff_cap_ms = config.backoff_cap.as_millis() as u64,
            "Connection manager created"
        );

        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                inner: Mutex::new(inner),
                state_tx,
                events: EventDispatcher::spawn(subscriber),
                metrics: Arc::new(LinkMetrics::new()),
                next_seq: AtomicU64::new(0),
                stop_tx,
                detached: AtomicBool::new(false),
            }),
        }
    }

    /// Begin connecting to `endpoint`.
    ///
    /// Clears the manual-close flag, resets backoff and drops anything still
    /// queued. A no-op while already connecting or connected.
    pub async fn start(&self, endpoint: Endpoint) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        if shared.state().is_busy() {
            debug!(%endpoint, state = %shared.state(), "Start ignored, link already active");
            shared.events.status("Already connected.");
            return;
        }

        info!(%endpoint, "Starting link");
        inner.endpoint = Some(endpoint);
        inner.manual_close = false;
        inner.scheduler.reset();
        inner.queue.clear();
        shared.begin_connect(&mut inner);
    }

    /// Close the link and suppress reconnection until the next `start`
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.raise_stop();
        let mut inner = shared.inner.lock().await;
        shared.halt(&mut inner);

        let previous = shared.state();
        if let Some(mut sink) = inner.sink.take() {
            shared.set_state(ConnectionState::Closing);
            if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
                debug!("Transport close timed out");
            }
        }
        shared.set_state(ConnectionState::Disconnected);
        if previous == ConnectionState::Connected {
            shared.metrics.disconnected();
        }

        info!(queued = inner.queue.len(), "Link stopped");
        shared.events.status(DisconnectCause::ManualClose.status_text());
    }

    /// Transmit now if connected, otherwise queue for the next connection.
    ///
    /// Connectivity problems are never returned: a failed write queues the
    /// message and starts recovery. The only error is a payload the
    /// configured transport cannot frame.
    pub async fn send(&self, payload: impl Into<Payload>) -> LinkResult<()> {
        let shared = &self.shared;
        let message = OutgoingMessage::new(shared.next_seq.fetch_add(1, Ordering::Relaxed), payload);
        shared.connector.validate(&message)?;

        let mut inner = shared.inner.lock().await;

        if shared.state() == ConnectionState::Connected {
            if let Some(sink) = inner.sink.as_mut() {
                let result = sink.transmit(&message).await;
                match result {
                    Ok(()) => {
                        shared.metrics.sent();
                        return Ok(());
                    }
                    Err(LinkError::Stopped) => {
                        // stop() is waiting on the lock and takes the link down
                        shared.enqueue(&mut inner, message);
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(seq = message.seq, error = %e, "Send failed, queueing message");
                        shared.enqueue(&mut inner, message);
                        shared.on_lost(&mut inner, DisconnectCause::from_error(e));
                        return Ok(());
                    }
                }
            }
        }

        shared.enqueue(&mut inner, message);
        debug!(queued = inner.queue.len(), "Not connected, message queued");
        Ok(())
    }

    /// Operator-requested immediate attempt; keeps the current backoff
    pub async fn reconnect(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock().await;

        if inner.manual_close {
            shared.events.status("Manual close: not reconnecting");
            return;
        }
        if shared.state().is_busy() {
            shared.events.status("Already connected.");
            return;
        }

        info!("Manual reconnect requested");
        shared.events.status("Manual reconnect requested...");
        shared.begin_connect(&mut inner);
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Messages waiting for the next connection
    pub async fn queued(&self) -> usize {
        self.shared.inner.lock().await.queue.len()
    }

    /// Delay the next scheduled retry would use
    pub async fn next_retry_delay(&self) -> Duration {
        self.shared.inner.lock().await.scheduler.backoff().peek()
    }

    pub async fn endpoint(&self) -> Option<Endpoint> {
        self.shared.inner.lock().await.endpoint.clone()
    }

    pub fn metrics(&self) -> Arc<LinkMetrics> {
        self.shared.metrics.clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.detached.store(true, Ordering::Release);
        self.shared.raise_stop();

        // A task holding the lock sees `detached` and releases the transport itself
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            self.shared.halt(&mut inner);
            if let Some(sink) = inner.sink.take() {
                close_in_background(sink.into_inner());
            }
        }
    }
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn raise_stop(&self) {
        self.stop_tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Suppress reconnection and cancel every task tied to the link
    fn halt(&self, inner: &mut LinkInner) {
        inner.manual_close = true;
        inner.generation += 1;
        inner.scheduler.cancel();
        if let Some(attempt) = inner.attempt.take() {
            attempt.abort();
        }
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
    }

    /// Tear down after the owning manager went away while this task held the lock
    fn release_detached(&self, inner: &mut LinkInner) {
        debug!("Manager dropped, releasing transport");
        self.halt(inner);
        if let Some(sink) = inner.sink.take() {
            close_in_background(sink.into_inner());
        }
        if self.state() == ConnectionState::Connected {
            self.metrics.disconnected();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn reconnect_suppressed(&self, inner: &LinkInner) -> bool {
        inner.manual_close || self.detached.load(Ordering::Acquire)
    }

    fn enqueue(&self, inner: &mut LinkInner, message: OutgoingMessage) {
        let evicted = inner.queue.enqueue(message);
        self.metrics.queued(evicted.is_some());
        if let Some(dropped) = evicted {
            debug!(seq = dropped.seq, "Queue full, dropped oldest message");
        }
    }

    /// Disconnected -> Connecting: spawn one attempt for a fresh generation
    fn begin_connect(self: &Arc<Self>, inner: &mut LinkInner) {
        let Some(endpoint) = inner.endpoint.clone() else {
            self.events.status("No endpoint set.");
            return;
        };

        inner.scheduler.cancel();
        if let Some(stale) = inner.attempt.take() {
            stale.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;

        self.set_state(ConnectionState::Connecting);
        self.metrics.connect_attempted();
        info!(%endpoint, generation, "Connecting");
        self.events.status("Connecting...");

        let shared = Arc::clone(self);
        inner.attempt = Some(tokio::spawn(shared.connect_task(endpoint, generation)));
    }

    async fn connect_task(self: Arc<Self>, endpoint: Endpoint, generation: u64) {
        let timeout = self.config.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.connector.open(&endpoint)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::ConnectTimeout {
                endpoint: endpoint.clone(),
                timeout,
            }),
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || self.reconnect_suppressed(&inner) {
            debug!(generation, "Discarding superseded connect attempt");
            if let Ok((sink, _)) = result {
                close_in_background(sink);
            }
            return;
        }
        // This task is finishing; forget the handle rather than abort ourselves
        inner.attempt = None;

        match result {
            Ok((sink, source)) => self.on_connected(&mut inner, generation, sink, source).await,
            Err(e) => {
                self.metrics.connect_failed();
                self.on_lost(&mut inner, DisconnectCause::ConnectFailure(e));
            }
        }
    }

    /// Connecting -> Connected: reset backoff, flush the backlog, start reading
    async fn on_connected(
        self: &Arc<Self>,
        inner: &mut LinkInner,
        generation: u64,
        sink: Box<dyn TransportSink>,
        source: Box<dyn TransportSource>,
    ) {
        let stop = self.stop_tx.subscribe();
        inner.scheduler.reset();
        self.set_state(ConnectionState::Connected);
        self.metrics.connected();
        info!(generation, queued = inner.queue.len(), "Connected");
        self.events.status("Connected");

        let sink = inner.sink.insert(GuardedSink {
            inner: sink,
            write_timeout: self.config.write_timeout,
            stop: stop.clone(),
        });
        let outcome = inner.queue.drain_into(sink).await;
        self.metrics.flushed(outcome.sent as u64);
        if outcome.sent > 0 {
            debug!(sent = outcome.sent, "Flushed queued messages");
        }
        match outcome.error {
            None => {}
            Some(LinkError::Stopped) if self.detached.load(Ordering::Acquire) => {
                self.release_detached(inner);
                return;
            }
            // stop() holds the next turn on the lock
            Some(LinkError::Stopped) => return,
            Some(e) => {
                self.on_lost(inner, DisconnectCause::from_error(e));
                return;
            }
        }
        if self.detached.load(Ordering::Acquire) {
            self.release_detached(inner);
            return;
        }

        let shared = Arc::clone(self);
        inner.reader = Some(tokio::spawn(shared.read_loop(source, stop, generation)));
    }

    async fn read_loop(
        self: Arc<Self>,
        mut source: Box<dyn TransportSource>,
        mut stop: watch::Receiver<u64>,
        generation: u64,
    ) {
        let cause = loop {
            let next = tokio::select! {
                next = source.next() => next,
                _ = stop.changed() => break None,
            };
            match next {
                Ok(Inbound::Message(text)) => {
                    self.metrics.received();
                    self.events.message(text);
                }
                Ok(Inbound::Closed { reason }) => break Some(DisconnectCause::ProtocolClose(reason)),
                Err(e) => break Some(DisconnectCause::from_error(e)),
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.generation != generation || self.state() != ConnectionState::Connected {
            return;
        }
        // This task is finishing; forget the handle rather than abort ourselves
        inner.reader = None;
        match cause {
            Some(cause) => self.on_lost(&mut inner, cause),
            None if self.detached.load(Ordering::Acquire) => self.release_detached(&mut inner),
            None => {}
        }
    }

    /// Connecting/Connected -> Disconnected, then arm a retry unless stopped
    fn on_lost(self: &Arc<Self>, inner: &mut LinkInner, cause: DisconnectCause) {
        if let Some(reader) = inner.reader.take() {
            reader.abort();
        }
        if let Some(sink) = inner.sink.take() {
            close_in_background(sink.into_inner());
        }

        if self.state() == ConnectionState::Connected {
            self.metrics.disconnected();
        }
        self.set_state(ConnectionState::Disconnected);

        warn!(cause = cause.label(), detail = %cause.status_text(), "Link down");
        self.events.status(cause.status_text());
        self.schedule_retry(inner);
    }

    fn schedule_retry(self: &Arc<Self>, inner: &mut LinkInner) {
        if self.reconnect_suppressed(inner) {
            debug!("Manual close set, not reconnecting");
            return;
        }

        let delay = inner.scheduler.next_delay();
        info!(delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.events.status(format!("Reconnecting in {}...", describe_delay(delay)));

        let shared = Arc::clone(self);
        let generation = inner.generation;
        inner
            .scheduler
            .schedule_once(delay, shared.retry_fired(generation));
    }

    async fn retry_fired(self: Arc<Self>, generation: u64) {
        let mut inner = self.inner.lock().await;
        inner.scheduler.disarm();

        if inner.generation != generation
            || self.reconnect_suppressed(&inner)
            || self.state() != ConnectionState::Disconnected
        {
            return;
        }
        debug!(generation, "Reconnect timer fired");
        self.begin_connect(&mut inner);
    }
}

/// Live transport sink. Each write is bounded by the write timeout and gives
/// way to the stop signal.
struct GuardedSink {
    inner: Box<dyn TransportSink>,
    write_timeout: Duration,
    stop: watch::Receiver<u64>,
}

impl GuardedSink {
    fn into_inner(self) -> Box<dyn TransportSink> {
        self.inner
    }
}

#[async_trait]
impl TransportSink for GuardedSink {
    async fn transmit(&mut self, message: &OutgoingMessage) -> LinkResult<()> {
        let write_timeout = self.write_timeout;
        tokio::select! {
            written = tokio::time::timeout(write_timeout, self.inner.transmit(message)) => {
                written.unwrap_or(Err(LinkError::WriteTimeout(write_timeout)))
            }
            _ = self.stop.changed() => Err(LinkError::Stopped),
        }
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

/// Close a transport off the caller's path, bounded by `CLOSE_TIMEOUT`
fn close_in_background(mut sink: Box<dyn TransportSink>) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        return;
    };
    runtime.spawn(async move {
        if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
            debug!("Transport close timed out");
        }
    });
}

/// "1s", "30s", or "250ms" for sub-second and fractional delays
fn describe_delay(delay: Duration) -> String {
    let millis = delay.as_millis();
    if millis >= 1000 && millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}ms", millis)
    }
}
