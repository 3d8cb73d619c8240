//! Vehicle control producer
//!
//! Holds the operator's current control inputs and publishes them over a
//! [`ConnectionManager`](crate::link::ConnectionManager).

mod publisher;
mod state;

pub use publisher::ControlPublisher;
pub use state::{ControlState, MAX_THROTTLE};
