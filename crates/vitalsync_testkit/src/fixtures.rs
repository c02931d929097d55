//! Test fixtures and server helpers.
//!
//! Provides seeded stores and an in-process server whose mutation clock
//! only moves when the test says so.

use crate::loopback::LoopbackConnector;
use std::sync::Arc;
use std::time::Duration;
use vitalsync_client::{ClientConfig, RetryConfig, SyncClient};
use vitalsync_core::{EntityStore, MutationConfig, TickOutput};
use vitalsync_protocol::Snapshot;
use vitalsync_server::{ConnectionManager, HandlerContext, ServerConfig};

/// Default wait used by [`eventually`].
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Creates a ward store that mutates every entity on every tick.
pub fn seeded_store(seed: u64) -> Arc<EntityStore> {
    let config = MutationConfig::new().with_selection(1.0, 1.0).with_seed(seed);
    Arc::new(EntityStore::ward(config).expect("ward profiles are valid"))
}

/// Server config whose periodic tick never fires during a test.
pub fn manual_server_config() -> ServerConfig {
    ServerConfig::default().with_tick_interval(Duration::from_secs(3600))
}

/// Client config that never reconnects.
pub fn test_client_config() -> ClientConfig {
    ClientConfig::new(crate::loopback::LOOPBACK_ENDPOINT).with_retry(RetryConfig::no_retry())
}

/// An in-process server driven by explicit ticks.
pub struct TestServer {
    /// The connection manager.
    pub manager: Arc<ConnectionManager>,
}

impl TestServer {
    /// Creates a server over a seeded store.
    pub fn new(seed: u64) -> Self {
        Self::with_config(manual_server_config(), seeded_store(seed))
    }

    /// Creates a server from explicit parts.
    pub fn with_config(config: ServerConfig, store: Arc<EntityStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        Self {
            manager: ConnectionManager::new(context),
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<EntityStore> {
        &self.manager.context().store
    }

    /// Runs one mutation tick now. `None` when no connection is listening.
    pub fn tick(&self) -> Option<Arc<TickOutput>> {
        self.manager.context().clock.tick_now()
    }

    /// Returns a connector into this server.
    pub fn connector(&self) -> LoopbackConnector {
        LoopbackConnector::new(Arc::clone(&self.manager))
    }

    /// Creates a client wired to this server.
    pub fn client(&self, config: ClientConfig) -> SyncClient<LoopbackConnector> {
        SyncClient::new(config, self.connector())
    }
}

/// Returns true when `mirror` holds the same collections as `expected`.
pub fn mirror_matches(mirror: Option<&Snapshot>, expected: &Snapshot) -> bool {
    mirror.is_some_and(|mirror| mirror.collections_eq(expected))
}

/// Polls `check` until it holds, panicking after [`DEFAULT_WAIT`].
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + DEFAULT_WAIT;
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
