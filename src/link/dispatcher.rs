//! Event dispatcher
//!
//! Every status change and inbound message funnels through one unbounded
//! channel into a single delivery task, so the subscriber sees events in the
//! order they were published regardless of which task produced them.
//! Subscriber failures (errors or panics) are logged and never reach the
//! publishing side.

use std::panic::{self, AssertUnwindSafe};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, trace};

/// A notification for the link's subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Human-readable lifecycle narration
    Status(String),
    /// Inbound application data
    Message(String),
}

/// Receives link events, one at a time, on the dispatcher task
pub trait LinkSubscriber: Send + 'static {
    fn on_status_changed(&mut self, status: &str) -> anyhow::Result<()>;

    fn on_message_received(&mut self, message: &str) -> anyhow::Result<()>;
}

/// Forwards events into a channel, useful for consumers that prefer `recv()`
impl LinkSubscriber for mpsc::UnboundedSender<LinkEvent> {
    fn on_status_changed(&mut self, status: &str) -> anyhow::Result<()> {
        self.send(LinkEvent::Status(status.to_owned()))?;
        Ok(())
    }

    fn on_message_received(&mut self, message: &str) -> anyhow::Result<()> {
        self.send(LinkEvent::Message(message.to_owned()))?;
        Ok(())
    }
}

/// Serialized delivery point for one subscriber
pub struct EventDispatcher {
    tx: mpsc::UnboundedSender<LinkEvent>,
    task: JoinHandle<()>,
}

impl EventDispatcher {
    /// Spawn the delivery task. Must be called within a tokio runtime.
    pub fn spawn<S: LinkSubscriber>(subscriber: S) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(deliver(subscriber, rx));
        Self { tx, task }
    }

    /// Queue an event for delivery. Never blocks.
    pub fn publish(&self, event: LinkEvent) {
        trace!(?event, "Publishing link event");
        if self.tx.send(event).is_err() {
            trace!("Dispatcher task gone, event dropped");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.publish(LinkEvent::Status(text.into()));
    }

    pub fn message(&self, text: impl Into<String>) {
        self.publish(LinkEvent::Message(text.into()));
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn deliver<S: LinkSubscriber>(mut subscriber: S, mut rx: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = rx.recv().await {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match &event {
            LinkEvent::Status(status) => subscriber.on_status_changed(status),
            LinkEvent::Message(message) => subscriber.on_message_received(message),
        }));

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, ?event, "Subscriber callback failed"),
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %reason, ?event, "Subscriber callback panicked");
            }
        }
    }
}
