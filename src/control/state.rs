//! Control state snapshot

use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Upper bound of the throttle percentage
pub const MAX_THROTTLE: u8 = 100;

/// Operator inputs. Setters clamp to the ranges the vehicle accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlState {
    armed: bool,
    throttle: u8,
    joystick_x: f64,
    joystick_y: f64,
}

/// Wire form, one JSON object per message
#[derive(Serialize)]
struct ControlFrame {
    armed: bool,
    throttle: u8,
    joystick_x: f64,
    joystick_y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    ts: Option<u64>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn throttle(&self) -> u8 {
        self.throttle
    }

    pub fn joystick(&self) -> (f64, f64) {
        (self.joystick_x, self.joystick_y)
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
    }

    /// Set throttle percentage, clamped to `0..=100`
    pub fn set_throttle(&mut self, throttle: i64) {
        self.throttle = throttle.clamp(0, MAX_THROTTLE as i64) as u8;
    }

    /// Set joystick deflection. Each axis is clamped to `[-1, 1]`; NaN and
    /// infinities read as centred.
    pub fn set_joystick(&mut self, x: f64, y: f64) {
        self.joystick_x = axis(x);
        self.joystick_y = axis(y);
    }

    /// Centre the joystick
    pub fn release_joystick(&mut self) {
        self.joystick_x = 0.0;
        self.joystick_y = 0.0;
    }

    /// Encode as a single-line JSON payload, optionally stamped with the
    /// current unix time in milliseconds
    pub fn to_payload(&self, include_timestamp: bool) -> serde_json::Result<String> {
        let ts = include_timestamp.then(unix_millis);
        serde_json::to_string(&ControlFrame {
            armed: self.armed,
            throttle: self.throttle,
            joystick_x: self.joystick_x,
            joystick_y: self.joystick_y,
            ts,
        })
    }
}

fn axis(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
