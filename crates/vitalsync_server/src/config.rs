//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;
use vitalsync_protocol::{FieldPath, DEFAULT_RATE_WINDOW};

/// Field paths that hybrid mode keeps on its critical-only ticks.
pub const DEFAULT_CRITICAL_PATHS: [&str; 2] = ["vitals.heartRate", "vitals.spo2"];

/// Configuration for the sync server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Period of the shared mutation clock.
    pub tick_interval: Duration,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Frames buffered per connection before sends start to wait.
    pub outbound_capacity: usize,
    /// Ticks buffered per connection before its scheduler lags.
    pub tick_capacity: usize,
    /// How long one send may wait before the connection is dropped.
    pub send_timeout: Duration,
    /// Samples kept for the update-frequency estimate.
    pub metrics_window: usize,
    /// Allow-list for hybrid critical-only ticks.
    pub critical_paths: Vec<FieldPath>,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            tick_interval: Duration::from_secs(5),
            max_connections: 1000,
            outbound_capacity: 64,
            tick_capacity: 16,
            send_timeout: Duration::from_secs(5),
            metrics_window: DEFAULT_RATE_WINDOW,
            critical_paths: DEFAULT_CRITICAL_PATHS
                .iter()
                .map(|path| FieldPath::from(*path))
                .collect(),
        }
    }

    /// Sets the bind address.
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Sets the mutation clock period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the maximum concurrent connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the outbound frame queue capacity per connection.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    /// Sets the tick buffer per connection.
    pub fn with_tick_capacity(mut self, capacity: usize) -> Self {
        self.tick_capacity = capacity.max(1);
        self
    }

    /// Sets the send timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sets the update-frequency window size.
    pub fn with_metrics_window(mut self, samples: usize) -> Self {
        self.metrics_window = samples;
        self
    }

    /// Replaces the hybrid critical allow-list.
    pub fn with_critical_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<FieldPath>,
    {
        self.critical_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 8080)))
    }
}
