//! Per-connection mode scheduling.
//!
//! [`ModeScheduler`] is the pure state machine that turns one tick into the
//! message a connection should receive in its current mode. A
//! [`SchedulerTask`] runs it against the shared clock for one connection.

use crate::connection::Connection;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vitalsync_core::{EntityStore, TickOutput, VersionedSnapshot};
use vitalsync_protocol::{
    DeltaUpdateType, FieldPath, HybridUpdateType, NextCycle, Patch, ServerMessage, UpdateMode,
};

/// Renders ticks into wire messages for one mode.
///
/// Hybrid mode alternates between phase 0, which sends every change, and
/// phase 1, which sends only allow-listed critical fields. The phase flips
/// on every tick, including ticks that produce no message.
#[derive(Debug, Clone)]
pub struct ModeScheduler {
    mode: UpdateMode,
    phase: u8,
    critical: Arc<[FieldPath]>,
}

impl ModeScheduler {
    /// Creates a scheduler in phase 0.
    pub fn new(mode: UpdateMode, critical: Arc<[FieldPath]>) -> Self {
        Self {
            mode,
            phase: 0,
            critical,
        }
    }

    /// Returns the mode.
    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Returns the hybrid phase the next tick will run in.
    pub fn phase(&self) -> u8 {
        self.phase
    }

    /// Renders one tick. Returns `None` when there is nothing to send.
    pub fn render(&mut self, tick: &TickOutput) -> Option<ServerMessage> {
        match self.mode {
            UpdateMode::Full => Some(ServerMessage::FullDataUpdate {
                data: (*tick.realtime).clone(),
                timestamp: tick.timestamp,
            }),
            UpdateMode::Delta => {
                let changes = Patch::from_changes(&tick.changes);
                if changes.is_empty() {
                    return None;
                }
                Some(ServerMessage::DeltaUpdate {
                    update_type: DeltaUpdateType::All,
                    changes,
                    timestamp: tick.timestamp,
                })
            }
            UpdateMode::Hybrid => {
                let phase = self.phase;
                self.phase ^= 1;

                let mut changes = Patch::from_changes(&tick.changes);
                let update_type = HybridUpdateType::for_phase(phase);
                let data_reduction = update_type == HybridUpdateType::CriticalOnly;
                if data_reduction {
                    changes.retain_paths(|path| self.critical.contains(path));
                }
                if changes.is_empty() {
                    return None;
                }
                Some(ServerMessage::HybridUpdate {
                    update_type,
                    changes,
                    cycle: NextCycle::from_phase(self.phase),
                    data_reduction,
                    timestamp: tick.timestamp,
                })
            }
        }
    }
}

/// The point of the store's history a connection's mirror reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncPoint {
    pub(crate) generation: u64,
    pub(crate) tick: u64,
}

impl From<&VersionedSnapshot> for SyncPoint {
    fn from(versioned: &VersionedSnapshot) -> Self {
        Self {
            generation: versioned.generation,
            tick: versioned.tick,
        }
    }
}

/// What a scheduler task owns while it runs. Handed back on stop so the
/// tick subscription survives a restart.
#[derive(Debug)]
pub(crate) struct ScheduleState {
    pub(crate) scheduler: ModeScheduler,
    pub(crate) ticks: broadcast::Receiver<Arc<TickOutput>>,
    pub(crate) synced: SyncPoint,
}

/// A running scheduler bound to one connection.
#[derive(Debug)]
pub(crate) struct SchedulerTask {
    cancel: CancellationToken,
    handle: JoinHandle<ScheduleState>,
}

impl SchedulerTask {
    /// Spawns the task.
    pub(crate) fn spawn(
        connection: Arc<Connection>,
        store: Arc<EntityStore>,
        state: ScheduleState,
    ) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(connection, store, state, cancel.clone()));
        Self { cancel, handle }
    }

    /// Stops the task and waits for it. No send happens after this returns.
    ///
    /// Returns `None` if the task panicked.
    pub(crate) async fn stop(self) -> Option<ScheduleState> {
        self.cancel.cancel();
        self.handle.await.ok()
    }
}

async fn run(
    connection: Arc<Connection>,
    store: Arc<EntityStore>,
    mut state: ScheduleState,
    cancel: CancellationToken,
) -> ScheduleState {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = connection.closed() => break,
            received = state.ticks.recv() => received,
        };

        let tick = match received {
            Ok(tick) => tick,
            Err(RecvError::Lagged(missed)) => {
                warn!(connection = %connection.id(), missed, "scheduler lagged, resyncing");
                if resync(&connection, &store, &mut state).await.is_err() {
                    break;
                }
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        // Already reflected in the last initial_data.
        if tick.tick <= state.synced.tick {
            continue;
        }
        if tick.generation != state.synced.generation {
            debug!(connection = %connection.id(), generation = tick.generation, "store regenerated, resyncing");
            if resync(&connection, &store, &mut state).await.is_err() {
                break;
            }
            continue;
        }

        if let Some(message) = state.scheduler.render(&tick) {
            if connection.send(&message).await.is_err() {
                break;
            }
        }
    }
    state
}

async fn resync(
    connection: &Connection,
    store: &EntityStore,
    state: &mut ScheduleState,
) -> crate::ServerResult<()> {
    let versioned = store.versioned_snapshot();
    state.synced = SyncPoint::from(&versioned);
    connection
        .send(&ServerMessage::InitialData {
            data: versioned.snapshot,
            timestamp: Utc::now(),
        })
        .await
        .map(|_| ())
}
