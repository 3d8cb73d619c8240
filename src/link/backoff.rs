//! Reconnect backoff
//!
//! `Backoff` is the pure delay sequence; `BackoffScheduler` adds the single
//! armed reconnect timer on top of it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::trace;

/// Exponential delay sequence bounded to `[base, cap]`
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `base`. `cap` below `base` is raised to `base`.
    pub fn new(base: Duration, cap: Duration) -> Self {
        let cap = cap.max(base);
        Self {
            base,
            cap,
            current: base,
        }
    }

    /// Return the current delay, then double it (saturating at the cap)
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }

    /// Delay the next call to `next_delay` will return
    pub fn peek(&self) -> Duration {
        self.current
    }

    /// Back to `base`
    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Backoff plus at most one pending reconnect timer.
///
/// Arming while a timer is pending cancels the old one and replaces it.
#[derive(Debug)]
pub struct BackoffScheduler {
    backoff: Backoff,
    timer: Option<JoinHandle<()>>,
}

impl BackoffScheduler {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            backoff: Backoff::new(base, cap),
            timer: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.backoff.next_delay()
    }

    pub fn reset(&mut self) {
        self.backoff.reset();
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Run `action` after `delay`, replacing any pending timer
    pub fn schedule_once<F>(&mut self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        }));
    }

    /// Abort the pending timer, if any
    pub fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            trace!("Cancelling pending reconnect timer");
            timer.abort();
        }
    }

    /// Forget the pending timer without aborting it.
    ///
    /// Called from inside the timer's own action once it has fired.
    pub fn disarm(&mut self) {
        self.timer = None;
    }

    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for BackoffScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
