//! Handlers for client control messages.

use crate::clock::MutationClock;
use crate::config::ServerConfig;
use crate::connection::Session;
use crate::error::ServerResult;
use crate::metrics::ServerMetrics;
use crate::scheduler::{ModeScheduler, SyncPoint};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use vitalsync_core::EntityStore;
use vitalsync_protocol::{ClientMessage, FieldPath, PerformanceReport, ServerMessage, UpdateMode};

/// Context shared by every connection.
#[derive(Debug)]
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// The entity store (shared across all connections).
    pub store: Arc<EntityStore>,
    /// The shared mutation clock.
    pub clock: Arc<MutationClock>,
    /// Server-wide counters.
    pub metrics: Arc<ServerMetrics>,
    critical: Arc<[FieldPath]>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<EntityStore>) -> Self {
        let clock = Arc::new(MutationClock::new(
            Arc::clone(&store),
            config.tick_interval,
            config.tick_capacity,
        ));
        Self {
            critical: Arc::from(config.critical_paths.clone()),
            config,
            store,
            clock,
            metrics: Arc::new(ServerMetrics::new()),
        }
    }

    /// Returns the hybrid critical allow-list.
    pub fn critical_paths(&self) -> Arc<[FieldPath]> {
        Arc::clone(&self.critical)
    }
}

/// Handler for client control messages.
#[derive(Debug)]
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    pub(crate) async fn handle(
        &self,
        session: &mut Session,
        message: ClientMessage,
    ) -> ServerResult<()> {
        match message {
            ClientMessage::SetUpdateMode { mode } => self.handle_set_mode(session, mode).await,
            ClientMessage::RequestFullData => self.handle_full_data(session).await,
            ClientMessage::RequestInitialData => self.handle_initial_data(session).await,
            ClientMessage::GetPerformanceMetrics => self.handle_metrics(session).await,
        }
    }

    /// Replaces the scheduler with a fresh one for `mode`. Hybrid always
    /// restarts at phase 0.
    async fn handle_set_mode(&self, session: &mut Session, mode: UpdateMode) -> ServerResult<()> {
        let mut state = session.pause().await?;
        let previous = session.connection.mode();
        session.connection.set_mode(mode);
        state.scheduler = ModeScheduler::new(mode, self.context.critical_paths());

        let ack = session
            .connection
            .send(&ServerMessage::ModeChanged {
                mode,
                timestamp: Utc::now(),
            })
            .await;
        session.resume(state);
        info!(connection = %session.connection.id(), from = %previous, to = %mode, "update mode changed");
        ack.map(|_| ())
    }

    /// Sends the realtime projection. The sync point is left alone: the
    /// projection omits fields a pending delta may still carry.
    async fn handle_full_data(&self, session: &mut Session) -> ServerResult<()> {
        let state = session.pause().await?;
        let sent = session
            .connection
            .send(&ServerMessage::FullData {
                data: self.context.store.realtime_snapshot(),
                timestamp: Utc::now(),
            })
            .await;
        session.resume(state);
        sent.map(|_| ())
    }

    /// Regenerates the whole store and resends `initial_data`. Other
    /// connections notice the new generation on their next tick.
    async fn handle_initial_data(&self, session: &mut Session) -> ServerResult<()> {
        let mut state = session.pause().await?;
        let versioned = self.context.store.regenerate();
        state.synced = SyncPoint::from(&versioned);

        let sent = session
            .connection
            .send(&ServerMessage::InitialData {
                data: versioned.snapshot,
                timestamp: Utc::now(),
            })
            .await;
        session.resume(state);
        info!(
            connection = %session.connection.id(),
            generation = versioned.generation,
            "initial data regenerated"
        );
        sent.map(|_| ())
    }

    async fn handle_metrics(&self, session: &mut Session) -> ServerResult<()> {
        let report = PerformanceReport {
            server: self.context.metrics.report(),
            client: session.connection.report(),
        };
        session
            .connection
            .send(&ServerMessage::PerformanceMetrics {
                data: report,
                timestamp: Utc::now(),
            })
            .await
            .map(|_| ())
    }
}
