// src/throttle.rs
use std::time::{SystemTime, UNIX_EPOCH};

/// Cooldown gate over epoch-second timestamps.
/// - A last-fired time of `0.0` (or below) means "never fired": the gate is open.
/// - Otherwise the gate opens once `now - last_fired >= window`.
/// - The gate itself is stateless; callers keep the timestamp and update it
///   explicitly after the action ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cooldown {
    window_secs: f64,
}

impl Cooldown {
    /// Negative or non-finite windows are treated as 0 (no cooldown).
    pub fn new(window_secs: f64) -> Self {
        let w = if window_secs.is_finite() {
            window_secs.max(0.0)
        } else {
            0.0
        };
        Self { window_secs: w }
    }

    pub fn window_secs(&self) -> f64 {
        self.window_secs
    }

    /// May the action fire at `now`? Does NOT mutate anything.
    pub fn is_open(&self, last_fired: f64, now: f64) -> bool {
        last_fired <= 0.0 || now - last_fired >= self.window_secs
    }

    /// Seconds until the gate opens again (0 when already open).
    pub fn remaining(&self, last_fired: f64, now: f64) -> f64 {
        if self.is_open(last_fired, now) {
            0.0
        } else {
            self.window_secs - (now - last_fired)
        }
    }
}

/// Current UNIX time in fractional seconds.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
