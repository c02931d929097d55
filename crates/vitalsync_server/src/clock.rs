//! The shared mutation clock.
//!
//! One periodic task drives [`EntityStore::tick`] for the whole server and
//! broadcasts each [`TickOutput`] to every connection's scheduler. A tick is
//! skipped while nobody is subscribed.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use vitalsync_core::{EntityStore, TickOutput};

/// Periodic driver of the entity store.
pub struct MutationClock {
    store: Arc<EntityStore>,
    period: Duration,
    ticks: broadcast::Sender<Arc<TickOutput>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MutationClock {
    /// Creates a stopped clock.
    ///
    /// `capacity` is the number of ticks a slow subscriber may fall behind
    /// before it lags.
    pub fn new(store: Arc<EntityStore>, period: Duration, capacity: usize) -> Self {
        let (ticks, _) = broadcast::channel(capacity.max(1));
        Self {
            store,
            period,
            ticks,
            task: Mutex::new(None),
        }
    }

    /// Returns a receiver for every tick from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<TickOutput>> {
        self.ticks.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.ticks.receiver_count()
    }

    /// Returns true if the periodic task is running.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Starts the periodic task if it is not already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let clock = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + clock.period;
            let mut interval = tokio::time::interval_at(start, clock.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                clock.tick_now();
            }
        }));
        info!(period_ms = self.period.as_millis() as u64, "mutation clock started");
    }

    /// Stops the periodic task.
    pub fn stop(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
            info!("mutation clock stopped");
        }
    }

    /// Runs one tick immediately and broadcasts it.
    ///
    /// Returns `None` without touching the store when nobody is subscribed.
    pub fn tick_now(&self) -> Option<Arc<TickOutput>> {
        if self.ticks.receiver_count() == 0 {
            debug!("no subscribers, tick skipped");
            return None;
        }
        let output = Arc::new(self.store.tick());
        let _ = self.ticks.send(Arc::clone(&output));
        Some(output)
    }
}

impl Drop for MutationClock {
    fn drop(&mut self) {
        if let Some(handle) = self.task.get_mut().take() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for MutationClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationClock")
            .field("period", &self.period)
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
