//! Resilient link
//!
//! Connection state machine, reconnect backoff, outbound queue and ordered
//! event delivery.

mod backoff;
mod dispatcher;
mod manager;
mod metrics;
mod queue;
mod state;

pub use backoff::{Backoff, BackoffScheduler};
pub use dispatcher::{EventDispatcher, LinkEvent, LinkSubscriber};
pub use manager::ConnectionManager;
pub use metrics::{LinkMetrics, LinkMetricsSnapshot};
pub use queue::{DrainOutcome, OutgoingMessage, OutgoingQueue, Payload, DEFAULT_QUEUE_CAPACITY};
pub use state::{ConnectionState, DisconnectCause};
