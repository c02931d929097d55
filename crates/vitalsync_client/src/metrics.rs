//! Client-side transfer accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use vitalsync_protocol::{per_second, RateWindow, UpdateMode};

/// Running counters for received traffic.
///
/// Data counters only move for substantive messages applied while active.
/// Raw counters see every inbound text frame, including discarded ones.
#[derive(Debug, Clone)]
pub struct ClientMetrics {
    data_received: u64,
    messages_received: u64,
    frames_received: u64,
    bytes_received: u64,
    last_update: Option<DateTime<Utc>>,
    window: RateWindow,
}

impl ClientMetrics {
    /// Creates zeroed counters.
    pub fn new(window: usize) -> Self {
        Self {
            data_received: 0,
            messages_received: 0,
            frames_received: 0,
            bytes_received: 0,
            last_update: None,
            window: RateWindow::new(window),
        }
    }

    /// Counts one raw inbound frame.
    pub fn record_frame(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Counts one applied data message.
    pub fn record_data(&mut self, bytes: usize, at: Instant) {
        self.data_received += bytes as u64;
        self.messages_received += 1;
        self.last_update = Some(Utc::now());
        self.window.record(at.into_std());
    }

    /// Zeroes every counter.
    pub fn clear(&mut self) {
        self.data_received = 0;
        self.messages_received = 0;
        self.frames_received = 0;
        self.bytes_received = 0;
        self.last_update = None;
        self.window.clear();
    }

    /// Bytes of applied data messages.
    pub fn data_received(&self) -> u64 {
        self.data_received
    }

    /// Number of applied data messages.
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    /// Mean size of an applied data message.
    pub fn average_message_size(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            self.data_received as f64 / self.messages_received as f64
        }
    }

    /// Data messages per second over the recent window.
    pub fn update_frequency(&self) -> Option<f64> {
        self.window.rate_per_sec()
    }
}

/// Connection facts that are not counters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinkStatus {
    pub(crate) uptime: Duration,
    pub(crate) runtime: Duration,
    pub(crate) connected: bool,
    pub(crate) paused: bool,
    pub(crate) reconnect_attempts: u32,
    pub(crate) mode: UpdateMode,
}

/// Point-in-time view of the client's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Bytes of applied data messages.
    pub data_received: u64,
    /// Number of applied data messages.
    pub messages_received: u64,
    /// Mean size of an applied data message.
    pub average_message_size: f64,
    /// Data messages per second over the recent window.
    pub update_frequency: Option<f64>,
    /// Wall-clock time of the last applied data message.
    pub last_update_time: Option<DateTime<Utc>>,
    /// Every inbound text frame, including ones discarded while paused.
    pub frames_received: u64,
    /// Bytes of every inbound text frame.
    pub bytes_received: u64,
    /// Milliseconds since the first connect.
    #[serde(rename = "uptime")]
    pub uptime_ms: u64,
    /// Milliseconds spent active.
    #[serde(rename = "runtime")]
    pub runtime_ms: u64,
    /// Data bytes per second of runtime.
    pub average_data_per_second: f64,
    /// Data bytes per second of uptime.
    pub average_data_per_second_uptime: f64,
    /// True while a link is open.
    pub is_connected: bool,
    /// True while inbound messages are discarded.
    pub is_paused: bool,
    /// Consecutive reconnect attempts so far.
    pub reconnect_attempts: u32,
    /// Last requested update mode.
    pub current_mode: UpdateMode,
}

impl MetricsSnapshot {
    pub(crate) fn build(metrics: &ClientMetrics, link: LinkStatus) -> Self {
        Self {
            data_received: metrics.data_received,
            messages_received: metrics.messages_received,
            average_message_size: metrics.average_message_size(),
            update_frequency: metrics.update_frequency(),
            last_update_time: metrics.last_update,
            frames_received: metrics.frames_received,
            bytes_received: metrics.bytes_received,
            uptime_ms: link.uptime.as_millis() as u64,
            runtime_ms: link.runtime.as_millis() as u64,
            average_data_per_second: per_second(metrics.data_received, link.runtime),
            average_data_per_second_uptime: per_second(metrics.data_received, link.uptime),
            is_connected: link.connected,
            is_paused: link.paused,
            reconnect_attempts: link.reconnect_attempts,
            current_mode: link.mode,
        }
    }

    /// Active time as a duration.
    pub fn runtime(&self) -> Duration {
        Duration::from_millis(self.runtime_ms)
    }

    /// Time since first connect as a duration.
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }
}
