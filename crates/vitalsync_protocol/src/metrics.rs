//! Transfer accounting shared by server and client.

use crate::messages::UpdateMode;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default number of samples kept by a [`RateWindow`].
pub const DEFAULT_RATE_WINDOW: usize = 10;

/// Sliding window over the arrival times of the most recent messages.
#[derive(Debug, Clone)]
pub struct RateWindow {
    capacity: usize,
    samples: VecDeque<Instant>,
}

impl RateWindow {
    /// Creates a window holding at most `capacity` samples (minimum 2).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Records one message at `at`, evicting the oldest sample when full.
    pub fn record(&mut self, at: Instant) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(at);
    }

    /// Messages per second across the window.
    ///
    /// Needs at least two samples spanning a non-zero duration.
    pub fn rate_per_sec(&self) -> Option<f64> {
        let (first, last) = (self.samples.front()?, self.samples.back()?);
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if self.samples.len() < 2 || span <= 0.0 {
            return None;
        }
        Some((self.samples.len() - 1) as f64 / span)
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drops every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

/// Divides `amount` by `elapsed` in seconds, or 0 for an empty interval.
pub fn per_second(amount: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        amount as f64 / secs
    } else {
        0.0
    }
}

/// Server-wide counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReport {
    /// Connections accepted since start.
    pub total_connections: u64,
    /// Connections currently registered.
    pub active_connections: u64,
    /// Bytes of data messages queued for socket writers.
    pub total_data_sent: u64,
    /// Number of data messages queued for socket writers.
    pub total_messages_sent: u64,
    /// Milliseconds since the server started.
    #[serde(rename = "uptime")]
    pub uptime_ms: u64,
    /// Data bytes per second of uptime.
    pub average_data_per_second: f64,
}

/// Counters for one connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionReport {
    /// Opaque connection identifier.
    pub connection_id: String,
    /// Bytes of data messages queued for the socket writer.
    pub data_sent: u64,
    /// Number of data messages queued for the socket writer.
    pub messages_sent: u64,
    /// Milliseconds since the connection was accepted.
    #[serde(rename = "connectionTime")]
    pub connection_time_ms: u64,
    /// Data bytes per second of connection time.
    pub average_data_per_second: f64,
    /// Mean size of a data message in bytes.
    pub average_message_size: f64,
    /// Data messages per second over the recent window.
    pub update_frequency: Option<f64>,
    /// Active update mode.
    pub current_mode: UpdateMode,
}

/// Payload of a `performance_metrics` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    /// Server-wide counters.
    pub server: ServerReport,
    /// Counters of the requesting connection.
    pub client: ConnectionReport,
}
