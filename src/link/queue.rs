//! Outgoing message queue
//!
//! Bounded FIFO for messages produced while the link is down. When full the
//! oldest entry is evicted: control commands are perishable, so the freshest
//! ones win.

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::transport::TransportSink;

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Opaque outbound payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(bytes))
    }
}

/// A payload plus its submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub seq: u64,
    pub payload: Payload,
}

impl OutgoingMessage {
    pub fn new(seq: u64, payload: impl Into<Payload>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }
}

/// Result of draining the queue into a transport
#[derive(Debug)]
pub struct DrainOutcome {
    /// Messages written before the drain stopped
    pub sent: usize,
    /// The write error that stopped the drain, if any
    pub error: Option<LinkError>,
}

/// Bounded FIFO with oldest-first eviction
#[derive(Debug)]
pub struct OutgoingQueue {
    items: VecDeque<OutgoingMessage>,
    capacity: usize,
    evicted: u64,
}

impl OutgoingQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Append, evicting the oldest entry first when full.
    ///
    /// Returns the evicted message, if any.
    pub fn enqueue(&mut self, message: OutgoingMessage) -> Option<OutgoingMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        if let Some(ref dropped) = evicted {
            trace!(seq = dropped.seq, "Queue full, evicted oldest message");
        }
        self.items.push_back(message);
        evicted
    }

    /// Transmit queued messages in FIFO order.
    ///
    /// Stops at the first failed write; the failed message goes back to the
    /// front so the remainder keeps its order.
    pub async fn drain_into(&mut self, sink: &mut dyn TransportSink) -> DrainOutcome {
        let mut sent = 0;
        while let Some(message) = self.items.pop_front() {
            match sink.transmit(&message).await {
                Ok(()) => sent += 1,
                Err(e) => {
                    debug!(seq = message.seq, sent, error = %e, "Flush interrupted");
                    if self.items.len() < self.capacity {
                        self.items.push_front(message);
                    } else {
                        self.evicted += 1;
                    }
                    return DrainOutcome {
                        sent,
                        error: Some(e),
                    };
                }
            }
        }
        DrainOutcome { sent, error: None }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total evictions since creation
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutgoingMessage> {
        self.items.iter()
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
