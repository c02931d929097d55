//! In-process transport between a client and a connection manager.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use vitalsync_client::{ClientResult, Connector, Duplex};
use vitalsync_server::ConnectionManager;

/// Endpoint label used with a [`LoopbackConnector`]. Any string works.
pub const LOOPBACK_ENDPOINT: &str = "loopback://ward";

/// Connects clients straight to a [`ConnectionManager`] over channels.
///
/// Every `connect` spawns one `serve` call, so the server side behaves as it
/// would behind a socket: limits, schedulers and shutdown all apply.
#[derive(Clone)]
pub struct LoopbackConnector {
    manager: Arc<ConnectionManager>,
    capacity: usize,
}

impl LoopbackConnector {
    /// Creates a connector for `manager`.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            capacity: 64,
        }
    }

    /// Sets the frame buffer of each direction.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Returns the manager behind this connector.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }
}

impl Connector for LoopbackConnector {
    fn connect<'a>(&'a self, _endpoint: &'a str) -> BoxFuture<'a, ClientResult<Duplex>> {
        async move {
            let (to_client, inbound) = mpsc::channel(self.capacity);
            let (outbound, from_client) = mpsc::channel(self.capacity);
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                let _ = manager.serve(to_client, from_client).await;
            });
            Ok(Duplex { outbound, inbound })
        }
        .boxed()
    }
}

impl std::fmt::Debug for LoopbackConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackConnector")
            .field("connections", &self.manager.connection_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
