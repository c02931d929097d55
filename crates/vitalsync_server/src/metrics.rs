//! Transfer accounting for the server and each connection.
//!
//! Only data messages are counted. Meta messages (`mode_changed`,
//! `performance_metrics`) never touch these counters.
//!
//! A message counts once its frame is accepted by the connection's outbound
//! queue. Frames still queued when a socket write fails are not taken back.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use vitalsync_protocol::{per_second, ConnectionReport, RateWindow, ServerReport, UpdateMode};

/// Server-wide counters.
#[derive(Debug)]
pub struct ServerMetrics {
    started: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    data_sent: AtomicU64,
    messages_sent: AtomicU64,
}

impl ServerMetrics {
    /// Creates zeroed counters starting now.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            total_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            data_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
        }
    }

    pub(crate) fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn connection_closed(&self) {
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    pub(crate) fn record_data(&self, bytes: usize) {
        self.data_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Returns the number of data messages sent to all connections.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Builds the wire report.
    pub fn report(&self) -> ServerReport {
        let uptime = self.started.elapsed();
        let data_sent = self.data_sent.load(Ordering::Relaxed);
        ServerReport {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections(),
            total_data_sent: data_sent,
            total_messages_sent: self.messages_sent(),
            uptime_ms: uptime.as_millis() as u64,
            average_data_per_second: per_second(data_sent, uptime),
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one connection.
#[derive(Debug)]
pub struct TransferMetrics {
    accepted: Instant,
    data_sent: AtomicU64,
    messages_sent: AtomicU64,
    window: Mutex<RateWindow>,
}

impl TransferMetrics {
    /// Creates zeroed counters starting now.
    pub fn new(window: usize) -> Self {
        Self {
            accepted: Instant::now(),
            data_sent: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            window: Mutex::new(RateWindow::new(window)),
        }
    }

    /// Records one data message of `bytes` bytes.
    pub fn record(&self, bytes: usize) {
        self.data_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.window.lock().record(Instant::now().into_std());
    }

    /// Returns the data bytes sent.
    pub fn data_sent(&self) -> u64 {
        self.data_sent.load(Ordering::Relaxed)
    }

    /// Returns the data messages sent.
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Builds the wire report for this connection.
    pub fn report(&self, connection_id: &str, mode: UpdateMode) -> ConnectionReport {
        let elapsed = self.accepted.elapsed();
        let data_sent = self.data_sent();
        let messages_sent = self.messages_sent();
        ConnectionReport {
            connection_id: connection_id.to_string(),
            data_sent,
            messages_sent,
            connection_time_ms: elapsed.as_millis() as u64,
            average_data_per_second: per_second(data_sent, elapsed),
            average_message_size: if messages_sent == 0 {
                0.0
            } else {
                data_sent as f64 / messages_sent as f64
            },
            update_frequency: self.window.lock().rate_per_sec(),
            current_mode: mode,
        }
    }
}
