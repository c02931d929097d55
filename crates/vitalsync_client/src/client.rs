//! The reconnecting sync client.

use crate::clock::RuntimeClock;
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, EventStream, EventTopic};
use crate::history::{HistoryEntry, MessageHistory};
use crate::metrics::{ClientMetrics, LinkStatus, MetricsSnapshot};
use crate::mirror::{ClientMirror, MirrorUpdate};
use crate::transport::{Connector, Duplex, WebSocketConnector};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use vitalsync_protocol::{ClientMessage, Frame, ServerMessage, Snapshot, UpdateMode, NORMAL_CLOSE};

/// Close code reported when a link drops without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

/// Reason sent with the close frame of [`SyncClient::disconnect`].
pub const DISCONNECT_REASON: &str = "Client disconnect";

/// Where the client's link stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No link and no reconnect in progress.
    Disconnected,
    /// A user-requested connect is in progress.
    Connecting,
    /// A link is open.
    Connected,
    /// Waiting for or running a reconnect attempt.
    Reconnecting,
    /// Reconnection gave up.
    Failed,
}

/// How a [`SyncClient::reset`] asked for fresh data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetAction {
    /// There was no link; a new one was opened in the active state.
    Reconnected,
    /// The client was paused; it resumed and requested initial data.
    Resumed,
    /// The client was active; it requested initial data.
    Requested,
}

struct Link {
    session: u64,
    outbound: mpsc::Sender<Frame>,
    reader: JoinHandle<()>,
}

struct ClientState {
    phase: ConnectionPhase,
    paused: bool,
    mode: UpdateMode,
    endpoint: Option<String>,
    link: Option<Link>,
    session: u64,
    first_connected: Option<Instant>,
    clock: RuntimeClock,
    metrics: ClientMetrics,
    history: MessageHistory,
    mirror: ClientMirror,
    reconnect_attempts: u32,
    reconnect_task: Option<JoinHandle<()>>,
}

impl ClientState {
    /// Runtime accrues only while a link is open and the client is active.
    fn sync_clock(&mut self, now: Instant) {
        if self.link.is_some() && !self.paused {
            self.clock.resume(now);
        } else {
            self.clock.pause(now);
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    fn failure(&self) -> Option<ClientError> {
        (self.phase == ConnectionPhase::Failed)
            .then(|| ClientError::MaxReconnectReached(self.reconnect_attempts))
    }
}

struct Inner<C> {
    config: ClientConfig,
    connector: C,
    state: Mutex<ClientState>,
    events: broadcast::Sender<ClientEvent>,
}

/// A sync client keeping a local mirror of server state.
///
/// A fresh connection starts paused: frames are received and counted as
/// raw traffic but neither applied nor counted as data until
/// [`resume`](Self::resume). [`start`](Self::start) connects and resumes in
/// one step so the server's `initial_data` is applied.
///
/// An unclean close triggers reconnection with exponential backoff up to
/// the configured attempt ceiling. A clean close never does.
pub struct SyncClient<C: Connector = WebSocketConnector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for SyncClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl SyncClient<WebSocketConnector> {
    /// Creates a client that connects over WebSocket.
    pub fn websocket(config: ClientConfig) -> Self {
        Self::new(config, WebSocketConnector)
    }
}

impl<C: Connector> SyncClient<C> {
    /// Creates a disconnected client.
    pub fn new(config: ClientConfig, connector: C) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let state = ClientState {
            phase: ConnectionPhase::Disconnected,
            paused: true,
            mode: UpdateMode::default(),
            endpoint: None,
            link: None,
            session: 0,
            first_connected: None,
            clock: RuntimeClock::new(),
            metrics: ClientMetrics::new(config.metrics_window),
            history: MessageHistory::new(config.history_limit),
            mirror: ClientMirror::new(),
            reconnect_attempts: 0,
            reconnect_task: None,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                connector,
                state: Mutex::new(state),
                events,
            }),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Subscribes to every event.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe(), Vec::new())
    }

    /// Subscribes to events of the given topics.
    pub fn subscribe_to(&self, topics: &[EventTopic]) -> EventStream {
        EventStream::new(self.inner.events.subscribe(), topics.to_vec())
    }

    /// Opens a link in the paused state.
    pub async fn connect(&self, endpoint: &str) -> ClientResult<()> {
        self.inner.state.lock().cancel_reconnect();
        self.inner.open(endpoint, false, false).await
    }

    /// Opens a link in the active state.
    pub async fn start(&self, endpoint: &str) -> ClientResult<()> {
        self.inner.state.lock().cancel_reconnect();
        self.inner.open(endpoint, true, false).await
    }

    /// Closes the link cleanly. Never triggers reconnection.
    pub async fn disconnect(&self) {
        let link = {
            let mut state = self.inner.state.lock();
            state.cancel_reconnect();
            let link = state.link.take();
            state.phase = ConnectionPhase::Disconnected;
            state.sync_clock(Instant::now());
            link
        };
        let Some(link) = link else {
            return;
        };
        let _ = link.outbound.send(Frame::close_normal(DISCONNECT_REASON)).await;
        link.reader.abort();
        info!("disconnected");
        self.inner.emit(ClientEvent::Disconnected {
            code: NORMAL_CLOSE,
            reason: DISCONNECT_REASON.to_string(),
            clean: true,
        });
    }

    /// Stops applying inbound messages. Returns false if already paused.
    pub fn pause(&self) -> bool {
        let mut state = self.inner.state.lock();
        if state.paused {
            return false;
        }
        state.paused = true;
        state.sync_clock(Instant::now());
        self.inner.emit(ClientEvent::Paused);
        debug!("paused");
        true
    }

    /// Applies inbound messages again. Returns false if already active.
    pub fn resume(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !state.paused {
            return false;
        }
        state.paused = false;
        state.sync_clock(Instant::now());
        self.inner.emit(ClientEvent::Resumed);
        debug!("resumed");
        true
    }

    /// Returns true while inbound messages are discarded.
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().paused
    }

    /// Returns true while a link is open.
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().link.is_some()
    }

    /// Returns the link phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.inner.state.lock().phase
    }

    /// Returns why the client stopped reconnecting, if it has.
    pub fn failure(&self) -> Option<ClientError> {
        self.inner.state.lock().failure()
    }

    /// Returns the last requested update mode.
    pub fn mode(&self) -> UpdateMode {
        self.inner.state.lock().mode
    }

    /// Asks the server to switch update mode.
    pub async fn set_update_mode(&self, mode: UpdateMode) -> ClientResult<()> {
        let outbound = self.inner.outbound()?;
        let previous = std::mem::replace(&mut self.inner.state.lock().mode, mode);
        info!(from = %previous, to = %mode, "update mode requested");
        self.inner
            .send(&outbound, &ClientMessage::SetUpdateMode { mode })
            .await
    }

    /// Asks for the realtime snapshot.
    pub async fn request_full_data(&self) -> ClientResult<()> {
        self.inner.request(ClientMessage::RequestFullData).await
    }

    /// Asks for the server's performance metrics.
    pub async fn request_performance_metrics(&self) -> ClientResult<()> {
        self.inner.request(ClientMessage::GetPerformanceMetrics).await
    }

    /// Asks the server to regenerate its data and resend `initial_data`.
    pub async fn request_initial_data(&self) -> ClientResult<()> {
        self.inner.request(ClientMessage::RequestInitialData).await
    }

    /// Clears the mirror, metrics and history, then makes sure exactly one
    /// fresh `initial_data` is on its way.
    pub async fn reset(&self) -> ClientResult<ResetAction> {
        let (connected, paused, endpoint) = {
            let mut state = self.inner.state.lock();
            state.mirror.clear();
            state.metrics.clear();
            state.history.clear();
            state.clock.reset(Instant::now());
            (state.link.is_some(), state.paused, state.endpoint.clone())
        };
        self.inner.emit(ClientEvent::DataReset);
        info!("client data reset");

        if !connected {
            let endpoint = endpoint.unwrap_or_else(|| self.inner.config.endpoint.clone());
            self.start(&endpoint).await?;
            return Ok(ResetAction::Reconnected);
        }
        if paused {
            self.resume();
            self.request_initial_data().await?;
            return Ok(ResetAction::Resumed);
        }
        self.request_initial_data().await?;
        Ok(ResetAction::Requested)
    }

    /// Returns a copy of the mirrored state.
    pub fn mirror(&self) -> Option<Snapshot> {
        self.inner.state.lock().mirror.snapshot().cloned()
    }

    /// Returns up to `limit` newest history entries.
    pub fn history(&self, limit: usize, data_only: bool) -> Vec<HistoryEntry> {
        self.inner.state.lock().history.recent(limit, data_only)
    }

    /// Returns a metrics snapshot as of now.
    pub fn metrics(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let state = self.inner.state.lock();
        let link = LinkStatus {
            uptime: state
                .first_connected
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default(),
            runtime: state.clock.runtime(now),
            connected: state.link.is_some(),
            paused: state.paused,
            reconnect_attempts: state.reconnect_attempts,
            mode: state.mode,
        };
        MetricsSnapshot::build(&state.metrics, link)
    }
}

impl<C> std::fmt::Debug for SyncClient<C>
where
    C: Connector,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SyncClient")
            .field("phase", &state.phase)
            .field("paused", &state.paused)
            .field("mode", &state.mode)
            .field("endpoint", &state.endpoint)
            .finish()
    }
}

impl<C: Connector> Inner<C> {
    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn outbound(&self) -> ClientResult<mpsc::Sender<Frame>> {
        let state = self.state.lock();
        match &state.link {
            Some(link) => Ok(link.outbound.clone()),
            None => Err(state.failure().unwrap_or(ClientError::NotConnected)),
        }
    }

    async fn request(&self, message: ClientMessage) -> ClientResult<()> {
        let outbound = self.outbound()?;
        self.send(&outbound, &message).await
    }

    async fn send(&self, outbound: &mpsc::Sender<Frame>, message: &ClientMessage) -> ClientResult<()> {
        let text = message.encode()?;
        let bytes = text.len();
        outbound.send(Frame::Text(text)).await.map_err(|_| {
            warn!(kind = message.message_type(), "send failed, link is gone");
            ClientError::ConnectionClosed
        })?;
        debug!(kind = message.message_type(), bytes, "frame sent");
        Ok(())
    }

    /// Opens a link. `reconnecting` keeps the phase at `Reconnecting` so a
    /// failed attempt does not look like a user-facing disconnect.
    async fn open(self: &Arc<Self>, endpoint: &str, active: bool, reconnecting: bool) -> ClientResult<()> {
        {
            let mut state = self.state.lock();
            if let Some(link) = state.link.take() {
                link.reader.abort();
            }
            if !reconnecting {
                state.phase = ConnectionPhase::Connecting;
            }
            state.endpoint = Some(endpoint.to_string());
            state.sync_clock(Instant::now());
        }

        let Duplex { outbound, inbound } = match self.connector.connect(endpoint).await {
            Ok(duplex) => duplex,
            Err(err) => {
                if !reconnecting {
                    self.state.lock().phase = ConnectionPhase::Disconnected;
                }
                warn!(endpoint, error = %err, "connect failed");
                self.emit(ClientEvent::Error(err.to_string()));
                return Err(err);
            }
        };

        let now = Instant::now();
        let mut state = self.state.lock();
        state.session += 1;
        let session = state.session;
        state.phase = ConnectionPhase::Connected;
        state.reconnect_attempts = 0;
        state.first_connected.get_or_insert(now);
        state.paused = !active;

        // Events go out before the reader can deliver any message.
        self.emit(ClientEvent::Connected {
            endpoint: endpoint.to_string(),
        });
        self.emit(if active {
            ClientEvent::Resumed
        } else {
            ClientEvent::Paused
        });

        let reader = tokio::spawn(Arc::clone(self).read_loop(session, inbound));
        state.link = Some(Link {
            session,
            outbound,
            reader,
        });
        state.sync_clock(now);
        drop(state);

        info!(endpoint, session, active, "connected");
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, session: u64, mut inbound: mpsc::Receiver<Frame>) {
        loop {
            match inbound.recv().await {
                Some(Frame::Text(text)) => self.handle_text(session, text),
                Some(Frame::Close { code, reason }) => {
                    self.on_closed(session, code, reason);
                    return;
                }
                None => {
                    self.on_closed(session, ABNORMAL_CLOSE, String::new());
                    return;
                }
            }
        }
    }

    fn handle_text(&self, session: u64, text: String) {
        let now = Instant::now();
        let bytes = text.len();
        let mut state = self.state.lock();
        if state.link.as_ref().map(|link| link.session) != Some(session) {
            return;
        }
        state.metrics.record_frame(bytes);
        if state.paused {
            debug!(bytes, "paused, frame discarded");
            return;
        }

        let message = match ServerMessage::decode(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, bytes, "ignoring inbound frame");
                return;
            }
        };
        let meta = message.is_meta();
        if !meta {
            state.metrics.record_data(bytes, now);
        }
        if let ServerMessage::ModeChanged { mode, .. } = &message {
            state.mode = *mode;
        }
        if state.mirror.apply(&message) == MirrorUpdate::NoBase {
            debug!(kind = message.message_type(), "patch before initial data dropped");
        }
        state.history.push(HistoryEntry {
            message_type: message.message_type().to_string(),
            size: bytes,
            received_at: Utc::now(),
            meta,
            raw: text,
        });
        debug!(kind = message.message_type(), bytes, meta, "frame received");
        self.emit(ClientEvent::Message(Arc::new(message)));
    }

    fn on_closed(self: &Arc<Self>, session: u64, code: u16, reason: String) {
        let clean = code == NORMAL_CLOSE;
        let mut state = self.state.lock();
        if state.link.as_ref().map(|link| link.session) != Some(session) {
            return;
        }
        state.link = None;
        state.phase = ConnectionPhase::Disconnected;
        state.sync_clock(Instant::now());

        if clean {
            info!(code, %reason, "server closed the connection");
        } else {
            warn!(code, %reason, "connection lost");
        }
        self.emit(ClientEvent::Disconnected {
            code,
            reason,
            clean,
        });

        if clean || self.config.retry.max_attempts == 0 {
            return;
        }
        let Some(endpoint) = state.endpoint.clone() else {
            return;
        };
        state.phase = ConnectionPhase::Reconnecting;
        state.reconnect_task = Some(tokio::spawn(Arc::clone(self).reconnect_loop(endpoint)));
    }

    /// Boxed so the open, read, close and reconnect futures do not form a
    /// recursive type.
    fn reconnect_loop(self: Arc<Self>, endpoint: String) -> BoxFuture<'static, ()> {
        async move { self.reconnect(&endpoint).await }.boxed()
    }

    async fn reconnect(self: &Arc<Self>, endpoint: &str) {
        let max_attempts = self.config.retry.max_attempts;
        for attempt in 1..=max_attempts {
            let delay = self.config.retry.delay_for_attempt(attempt);
            {
                let mut state = self.state.lock();
                if state.phase != ConnectionPhase::Reconnecting {
                    return;
                }
                state.reconnect_attempts = attempt;
            }
            info!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, "reconnecting");
            self.emit(ClientEvent::Reconnecting { attempt, delay });
            tokio::time::sleep(delay).await;

            let active = {
                let state = self.state.lock();
                if state.phase != ConnectionPhase::Reconnecting {
                    return;
                }
                !state.paused
            };
            match self.open(endpoint, active, true).await {
                Ok(()) => return,
                Err(err) if !err.is_retryable() => {
                    warn!(attempt, error = %err, "reconnect cannot succeed, giving up");
                    break;
                }
                Err(_) => {}
            }
        }

        let attempts = {
            let mut state = self.state.lock();
            if state.phase != ConnectionPhase::Reconnecting {
                return;
            }
            state.phase = ConnectionPhase::Failed;
            state.reconnect_task = None;
            state.reconnect_attempts
        };
        error!(attempts, max_attempts, "reconnect abandoned");
        self.emit(ClientEvent::MaxReconnectReached { attempts });
    }
}
