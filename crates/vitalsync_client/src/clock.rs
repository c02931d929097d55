//! Active-time accounting.

use std::time::Duration;
use tokio::time::Instant;

/// Cumulative time spent in the active (non-paused) state.
///
/// `resume` while active and `pause` while paused are no-ops, so the
/// accumulator only ever folds in one open interval.
#[derive(Debug, Clone, Default)]
pub struct RuntimeClock {
    started: Option<Instant>,
    accumulated: Duration,
}

impl RuntimeClock {
    /// Creates a paused clock at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true while the clock is running.
    pub fn is_running(&self) -> bool {
        self.started.is_some()
    }

    /// Starts the clock. Returns false if it was already running.
    pub fn resume(&mut self, now: Instant) -> bool {
        if self.started.is_some() {
            return false;
        }
        self.started = Some(now);
        true
    }

    /// Stops the clock, folding the open interval into the total. Returns
    /// false if it was already stopped.
    pub fn pause(&mut self, now: Instant) -> bool {
        match self.started.take() {
            Some(started) => {
                self.accumulated += now.saturating_duration_since(started);
                true
            }
            None => false,
        }
    }

    /// Returns the total active time up to `now`.
    pub fn runtime(&self, now: Instant) -> Duration {
        let open = self
            .started
            .map(|started| now.saturating_duration_since(started))
            .unwrap_or_default();
        self.accumulated + open
    }

    /// Zeroes the total. A running clock keeps running from `now`.
    pub fn reset(&mut self, now: Instant) {
        self.accumulated = Duration::ZERO;
        if self.started.is_some() {
            self.started = Some(now);
        }
    }
}
