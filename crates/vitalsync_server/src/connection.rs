//! Connection state and the connection manager.
//!
//! A connection is any pair of frame channels. The WebSocket listener in
//! [`crate::SyncServer`] provides them for real sockets; tests wire them up
//! directly.

use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::metrics::{ServerMetrics, TransferMetrics};
use crate::scheduler::{ModeScheduler, ScheduleState, SchedulerTask, SyncPoint};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitalsync_core::EntityStore;
use vitalsync_protocol::{
    ClientMessage, ConnectionReport, Frame, ServerMessage, UpdateMode, TRY_AGAIN_LATER,
};

/// Reason sent with the close frame on shutdown.
pub const SHUTDOWN_REASON: &str = "Server shutdown";

/// State of one open connection.
#[derive(Debug)]
pub struct Connection {
    id: String,
    mode: Mutex<UpdateMode>,
    metrics: TransferMetrics,
    server_metrics: Arc<ServerMetrics>,
    outbound: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    send_timeout: Duration,
}

impl Connection {
    fn new(
        outbound: mpsc::Sender<Frame>,
        cancel: CancellationToken,
        context: &HandlerContext,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mode: Mutex::new(UpdateMode::default()),
            metrics: TransferMetrics::new(context.config.metrics_window),
            server_metrics: Arc::clone(&context.metrics),
            outbound,
            cancel,
            send_timeout: context.config.send_timeout,
        }
    }

    /// Returns the opaque connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the active update mode.
    pub fn mode(&self) -> UpdateMode {
        *self.mode.lock()
    }

    pub(crate) fn set_mode(&self, mode: UpdateMode) {
        *self.mode.lock() = mode;
    }

    /// Returns the transfer counters.
    pub fn metrics(&self) -> &TransferMetrics {
        &self.metrics
    }

    /// Builds the wire report for this connection.
    pub fn report(&self) -> ConnectionReport {
        self.metrics.report(&self.id, self.mode())
    }

    /// Returns true once the connection is being torn down.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the connection is being torn down.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    fn close(&self) {
        self.cancel.cancel();
    }

    /// Encodes and queues one message.
    ///
    /// Any failure to queue closes the connection. Data messages are
    /// counted once queued; meta messages are not.
    pub async fn send(&self, message: &ServerMessage) -> ServerResult<usize> {
        if self.is_closed() {
            return Err(ServerError::ConnectionClosed);
        }
        let text = message.encode()?;
        let bytes = text.len();

        match tokio::time::timeout(self.send_timeout, self.outbound.send(Frame::Text(text))).await
        {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                warn!(connection = %self.id, "peer gone, closing connection");
                self.close();
                return Err(ServerError::ConnectionClosed);
            }
            Err(_) => {
                warn!(connection = %self.id, timeout = ?self.send_timeout, "send timed out, closing connection");
                self.close();
                return Err(ServerError::SendTimeout(self.send_timeout));
            }
        }

        let meta = message.is_meta();
        if !meta {
            self.metrics.record(bytes);
            self.server_metrics.record_data(bytes);
        }
        debug!(
            connection = %self.id,
            kind = message.message_type(),
            bytes,
            meta,
            "frame sent"
        );
        Ok(bytes)
    }

    async fn send_close(&self, frame: Frame) {
        let _ = tokio::time::timeout(self.send_timeout, self.outbound.send(frame)).await;
    }
}

/// One connection's scheduler slot, owned by its serve loop.
///
/// Control handlers stop the scheduler before touching anything that must
/// stay ordered with the periodic updates, then start it again.
pub(crate) struct Session {
    pub(crate) connection: Arc<Connection>,
    store: Arc<EntityStore>,
    context: Arc<HandlerContext>,
    scheduler: Option<SchedulerTask>,
}

impl Session {
    /// Stops the running scheduler and takes its state.
    ///
    /// If the task is gone, a fresh subscription is made and the connection
    /// resynced so no tick goes missing.
    pub(crate) async fn pause(&mut self) -> ServerResult<ScheduleState> {
        if let Some(state) = match self.scheduler.take() {
            Some(task) => task.stop().await,
            None => None,
        } {
            return Ok(state);
        }

        warn!(connection = %self.connection.id(), "scheduler lost, resubscribing");
        let ticks = self.context.clock.subscribe();
        let versioned = self.store.versioned_snapshot();
        let synced = SyncPoint::from(&versioned);
        self.connection
            .send(&ServerMessage::InitialData {
                data: versioned.snapshot,
                timestamp: Utc::now(),
            })
            .await?;
        Ok(ScheduleState {
            scheduler: ModeScheduler::new(self.connection.mode(), self.context.critical_paths()),
            ticks,
            synced,
        })
    }

    /// Starts a scheduler with `state`.
    pub(crate) fn resume(&mut self, state: ScheduleState) {
        self.scheduler = Some(SchedulerTask::spawn(
            Arc::clone(&self.connection),
            Arc::clone(&self.store),
            state,
        ));
    }

    async fn stop(&mut self) {
        if let Some(task) = self.scheduler.take() {
            task.stop().await;
        }
    }
}

/// Registry of open connections.
///
/// Every connection gets an `initial_data` snapshot on accept, starts in
/// `full` mode, and is driven by its own scheduler fed from the shared
/// mutation clock.
pub struct ConnectionManager {
    context: Arc<HandlerContext>,
    handler: RequestHandler,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    shutdown: CancellationToken,
    drained: Notify,
}

impl ConnectionManager {
    /// Creates a manager over a shared store.
    pub fn new(context: Arc<HandlerContext>) -> Arc<Self> {
        Arc::new(Self {
            handler: RequestHandler::new(Arc::clone(&context)),
            context,
            connections: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            drained: Notify::new(),
        })
    }

    /// Returns the shared context.
    pub fn context(&self) -> &Arc<HandlerContext> {
        &self.context
    }

    /// Returns the number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns an open connection by id.
    pub fn connection(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Returns the ids of every open connection.
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs one connection until it closes.
    ///
    /// `outbound` carries frames to the peer and `inbound` frames from it.
    /// Returns once the peer closes, a send fails, or the manager shuts down.
    pub async fn serve(
        self: &Arc<Self>,
        outbound: mpsc::Sender<Frame>,
        mut inbound: mpsc::Receiver<Frame>,
    ) -> ServerResult<()> {
        if self.is_shutting_down() {
            let _ = outbound.send(Frame::close_normal(SHUTDOWN_REASON)).await;
            return Err(ServerError::ShuttingDown);
        }

        let max = self.context.config.max_connections;
        let admitted = {
            let mut connections = self.connections.write();
            if connections.len() >= max {
                None
            } else {
                let connection = Arc::new(Connection::new(
                    outbound.clone(),
                    self.shutdown.child_token(),
                    &self.context,
                ));
                connections.insert(connection.id().to_string(), Arc::clone(&connection));
                Some(connection)
            }
        };
        let Some(connection) = admitted else {
            warn!(max, "connection refused, limit reached");
            let _ = outbound
                .send(Frame::Close {
                    code: TRY_AGAIN_LATER,
                    reason: "connection limit reached".into(),
                })
                .await;
            return Err(ServerError::ConnectionLimit(max));
        };
        drop(outbound);
        self.context.metrics.connection_opened();
        self.context.clock.start();
        info!(connection = %connection.id(), "client connected");

        let mut session = Session {
            connection: Arc::clone(&connection),
            store: Arc::clone(&self.context.store),
            context: Arc::clone(&self.context),
            scheduler: None,
        };
        let result = self.drive(&mut session, &mut inbound).await;
        session.stop().await;

        if self.is_shutting_down() {
            connection.send_close(Frame::close_normal(SHUTDOWN_REASON)).await;
        }
        connection.close();
        self.release(connection.id());

        match &result {
            Ok(()) => info!(connection = %connection.id(), "client disconnected"),
            Err(err) => info!(connection = %connection.id(), error = %err, "client dropped"),
        }
        result
    }

    async fn drive(
        &self,
        session: &mut Session,
        inbound: &mut mpsc::Receiver<Frame>,
    ) -> ServerResult<()> {
        let connection = Arc::clone(&session.connection);

        // Subscribe before the snapshot so no tick falls between them.
        let ticks = self.context.clock.subscribe();
        let versioned = self.context.store.versioned_snapshot();
        let synced = SyncPoint::from(&versioned);
        connection
            .send(&ServerMessage::InitialData {
                data: versioned.snapshot,
                timestamp: Utc::now(),
            })
            .await?;
        session.resume(ScheduleState {
            scheduler: ModeScheduler::new(connection.mode(), self.context.critical_paths()),
            ticks,
            synced,
        });

        loop {
            let frame = tokio::select! {
                _ = connection.closed() => {
                    return if self.is_shutting_down() {
                        Ok(())
                    } else {
                        Err(ServerError::ConnectionClosed)
                    };
                }
                frame = inbound.recv() => frame,
            };

            match frame {
                Some(Frame::Text(text)) => match ClientMessage::decode(&text) {
                    Ok(message) => {
                        debug!(
                            connection = %connection.id(),
                            kind = message.message_type(),
                            bytes = text.len(),
                            "frame received"
                        );
                        if let Err(err) = self.handler.handle(session, message).await {
                            if err.is_connection_fatal() {
                                return Err(err);
                            }
                            warn!(connection = %connection.id(), error = %err, "request failed");
                        }
                    }
                    Err(err) => {
                        let err = ServerError::from(err);
                        if !err.is_client_error() {
                            return Err(err);
                        }
                        warn!(connection = %connection.id(), error = %err, "ignoring inbound frame");
                    }
                },
                Some(Frame::Close { code, reason }) => {
                    debug!(connection = %connection.id(), code, %reason, "peer closed");
                    return Ok(());
                }
                None => return Ok(()),
            }
        }
    }

    fn release(&self, id: &str) {
        let mut connections = self.connections.write();
        if connections.remove(id).is_some() {
            self.context.metrics.connection_closed();
        }
        if connections.is_empty() {
            self.drained.notify_waiters();
        }
    }

    /// Stops every scheduler, closes every connection cleanly, and stops
    /// the mutation clock. Waits at most `grace` for connections to drain.
    pub async fn shutdown(&self, grace: Duration) {
        info!(connections = self.connection_count(), "shutting down");
        self.shutdown.cancel();

        let drained = async {
            loop {
                let notified = self.drained.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.connections.read().is_empty() {
                    break;
                }
                notified.await;
            }
        };
        if tokio::time::timeout(grace, drained).await.is_err() {
            warn!(
                remaining = self.connection_count(),
                "connections still open after shutdown grace period"
            );
        }
        self.context.clock.stop();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.connection_count())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}
