//! Control publisher
//!
//! Sends a control snapshot on a fixed cadence so the vehicle keeps hearing
//! from the operator, and immediately whenever an input changes. Snapshots
//! produced while the link is down land in the manager's outgoing queue.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::state::ControlState;
use crate::link::ConnectionManager;

/// Periodic and on-change publisher of [`ControlState`]
pub struct ControlPublisher {
    state: Arc<Mutex<ControlState>>,
    link: Arc<ConnectionManager>,
    include_timestamp: bool,
    ticker: Option<JoinHandle<()>>,
}

impl ControlPublisher {
    /// Start the cadence task. Must be called within a tokio runtime.
    pub fn spawn(link: Arc<ConnectionManager>, cadence: Duration, include_timestamp: bool) -> Self {
        let state = Arc::new(Mutex::new(ControlState::new()));
        let ticker = tokio::spawn(cadence_loop(
            state.clone(),
            link.clone(),
            cadence,
            include_timestamp,
        ));

        Self {
            state,
            link,
            include_timestamp,
            ticker: Some(ticker),
        }
    }

    /// Current inputs
    pub fn snapshot(&self) -> ControlState {
        *self.state.lock()
    }

    pub async fn set_armed(&self, armed: bool) {
        self.update(|state| state.set_armed(armed)).await;
    }

    pub async fn set_throttle(&self, throttle: i64) {
        self.update(|state| state.set_throttle(throttle)).await;
    }

    pub async fn set_joystick(&self, x: f64, y: f64) {
        self.update(|state| state.set_joystick(x, y)).await;
    }

    pub async fn release_joystick(&self) {
        self.update(ControlState::release_joystick).await;
    }

    /// Stop the cadence task. Input setters still publish.
    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    async fn update(&self, mutate: impl FnOnce(&mut ControlState)) {
        let snapshot = {
            let mut state = self.state.lock();
            mutate(&mut state);
            *state
        };
        publish(&self.link, &snapshot, self.include_timestamp).await;
    }
}

impl Drop for ControlPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn cadence_loop(
    state: Arc<Mutex<ControlState>>,
    link: Arc<ConnectionManager>,
    cadence: Duration,
    include_timestamp: bool,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + cadence, cadence);
    loop {
        interval.tick().await;
        let snapshot = *state.lock();
        publish(&link, &snapshot, include_timestamp).await;
    }
}

async fn publish(link: &ConnectionManager, snapshot: &ControlState, include_timestamp: bool) {
    let payload = match snapshot.to_payload(include_timestamp) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Failed to encode control state");
            return;
        }
    };

    if let Err(e) = link.send(payload).await {
        warn!(error = %e, "Control state rejected by transport");
    } else {
        debug!(connected = link.is_connected(), "Control state published");
    }
}
