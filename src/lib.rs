//! Roverlink - resilient control link to a remote vehicle
//!
//! This library keeps one logical connection to a vehicle's control channel
//! alive across wireless dropouts: it reconnects with capped exponential
//! backoff, queues outbound commands while the link is down and delivers
//! status narration and inbound telemetry to a single subscriber in order.

pub mod config;
pub mod control;
pub mod error;
pub mod link;
pub mod metrics;
pub mod transport;
pub mod util;

pub use config::{Config, LinkConfig};
pub use error::{LinkError, LinkResult};
pub use link::{ConnectionManager, ConnectionState, LinkEvent, LinkSubscriber};
pub use transport::{Endpoint, TransportKind};

/// Library version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
