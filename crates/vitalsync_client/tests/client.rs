//! Client behaviour against a scripted in-memory server.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vitalsync_client::{
    ClientConfig, ClientError, ClientEvent, ClientResult, ConnectionPhase, Connector, Duplex,
    EventStream, EventTopic, ResetAction, RetryConfig, SyncClient, DISCONNECT_REASON,
};
use vitalsync_protocol::{
    ClientMessage, DeltaUpdateType, EntityMap, Frame, Patch, ServerMessage, Snapshot, UpdateMode,
    NORMAL_CLOSE,
};

const ENDPOINT: &str = "ws://fake";
const WAIT: Duration = Duration::from_secs(60);

/// The server end of one accepted fake connection.
struct FakeServer {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl FakeServer {
    async fn send(&self, message: &ServerMessage) {
        self.send_raw(&message.encode().unwrap()).await;
    }

    async fn send_raw(&self, text: &str) {
        self.tx.send(Frame::Text(text.to_string())).await.unwrap();
    }

    async fn frame(&mut self) -> Frame {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client dropped the link")
    }

    async fn request(&mut self) -> ClientMessage {
        match self.frame().await {
            Frame::Text(text) => ClientMessage::decode(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }
}

#[derive(Clone)]
struct FakeConnector {
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
    accepted: mpsc::UnboundedSender<FakeServer>,
}

impl FakeConnector {
    fn new() -> (Self, mpsc::UnboundedReceiver<FakeServer>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            refusing: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicU32::new(0)),
            accepted: tx,
        };
        (connector, rx)
    }

    fn refuse(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(&'a self, _endpoint: &'a str) -> BoxFuture<'a, ClientResult<Duplex>> {
        async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.refusing.load(Ordering::SeqCst) {
                return Err(ClientError::Connect("connection refused".into()));
            }
            let (to_client, inbound) = mpsc::channel(64);
            let (outbound, from_client) = mpsc::channel(64);
            let server = FakeServer {
                tx: to_client,
                rx: from_client,
            };
            let _ = self.accepted.send(server);
            Ok(Duplex { outbound, inbound })
        }
        .boxed()
    }
}

struct Harness {
    client: SyncClient<FakeConnector>,
    connector: FakeConnector,
    accepted: mpsc::UnboundedReceiver<FakeServer>,
    events: EventStream,
}

impl Harness {
    fn new(config: ClientConfig) -> Self {
        let (connector, accepted) = FakeConnector::new();
        let client = SyncClient::new(config, connector.clone());
        let events = client.subscribe();
        Self {
            client,
            connector,
            accepted,
            events,
        }
    }

    fn no_retry() -> Self {
        Self::new(ClientConfig::new(ENDPOINT).with_retry(RetryConfig::no_retry()))
    }

    async fn server(&mut self) -> FakeServer {
        tokio::time::timeout(WAIT, self.accepted.recv())
            .await
            .expect("no connection accepted")
            .unwrap()
    }

    async fn event(&mut self, topic: EventTopic) -> ClientEvent {
        loop {
            let event = tokio::time::timeout(WAIT, self.events.next())
                .await
                .expect("timed out waiting for an event")
                .expect("client dropped");
            if event.matches(topic) {
                return event;
            }
        }
    }

    async fn messages(&mut self, count: usize) {
        for _ in 0..count {
            self.event(EventTopic::Message).await;
        }
    }
}

/// Lets every runnable task drain its queue.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn snapshot(heart_rate: i64) -> Snapshot {
    let mut patients = EntityMap::new();
    patients.insert(
        "P001".into(),
        json!({"status": "stable", "vitals": {"heartRate": heart_rate, "spo2": 98}}),
    );
    let mut collections = BTreeMap::new();
    collections.insert("patients".to_string(), patients);
    Snapshot::new("ICU-A", collections, Utc::now())
}

fn initial_data() -> ServerMessage {
    ServerMessage::InitialData {
        data: snapshot(70),
        timestamp: Utc::now(),
    }
}

fn heart_rate_delta(value: i64) -> ServerMessage {
    let mut changes = Patch::new();
    changes.insert("patients", "P001", "vitals.heartRate", json!(value));
    ServerMessage::DeltaUpdate {
        update_type: DeltaUpdateType::All,
        changes,
        timestamp: Utc::now(),
    }
}

#[tokio::test(start_paused = true)]
async fn paused_client_counts_frames_but_applies_nothing() {
    let mut h = Harness::no_retry();
    h.client.connect(ENDPOINT).await.unwrap();
    let server = h.server().await;
    assert!(h.client.is_paused());
    assert_eq!(h.client.phase(), ConnectionPhase::Connected);

    for _ in 0..5 {
        server.send(&initial_data()).await;
    }
    settle().await;

    let metrics = h.client.metrics();
    assert_eq!(metrics.frames_received, 5);
    assert_eq!(metrics.messages_received, 0);
    assert_eq!(metrics.data_received, 0);
    assert_eq!(metrics.runtime_ms, 0);
    assert!(h.client.mirror().is_none());
    assert!(h.client.history(100, false).is_empty());
}

#[tokio::test(start_paused = true)]
async fn runtime_tracks_active_time_only() {
    let mut h = Harness::no_retry();
    h.client.connect(ENDPOINT).await.unwrap();
    let _server = h.server().await;

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(h.client.resume());
    assert!(!h.client.resume());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(h.client.pause());
    assert!(!h.client.pause());
    tokio::time::advance(Duration::from_secs(4)).await;
    h.client.resume();
    tokio::time::advance(Duration::from_secs(1)).await;

    let metrics = h.client.metrics();
    assert_eq!(metrics.uptime_ms, 10_000);
    assert_eq!(metrics.runtime_ms, 3_000);
    assert!(metrics.runtime() <= metrics.uptime());
}

#[tokio::test(start_paused = true)]
async fn active_client_mirrors_server_messages() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let server = h.server().await;
    assert!(!h.client.is_paused());

    server.send(&initial_data()).await;
    server.send(&heart_rate_delta(99)).await;
    server
        .send(&ServerMessage::ModeChanged {
            mode: UpdateMode::Delta,
            timestamp: Utc::now(),
        })
        .await;
    h.messages(3).await;

    let mirror = h.client.mirror().unwrap();
    assert_eq!(mirror.entity("patients", "P001").unwrap()["vitals"]["heartRate"], 99);
    assert_eq!(h.client.mode(), UpdateMode::Delta);

    let metrics = h.client.metrics();
    assert_eq!(metrics.messages_received, 2);
    assert_eq!(metrics.frames_received, 3);
    assert_eq!(metrics.current_mode, UpdateMode::Delta);

    let history = h.client.history(100, false);
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].message_type, "mode_changed");
    assert!(history[0].meta);
    assert_eq!(h.client.history(100, true).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_are_ignored() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let server = h.server().await;

    server.send_raw("not json").await;
    server.send_raw(r#"{"type":"bogus"}"#).await;
    server.send(&initial_data()).await;
    let event = h.event(EventTopic::InitialData).await;
    assert!(matches!(event.message(), Some(ServerMessage::InitialData { .. })));

    let metrics = h.client.metrics();
    assert_eq!(metrics.frames_received, 3);
    assert_eq!(metrics.messages_received, 1);
    assert_eq!(h.client.history(100, false).len(), 1);
    assert!(h.client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn history_keeps_only_the_newest_entries() {
    let mut h = Harness::new(
        ClientConfig::new(ENDPOINT)
            .with_retry(RetryConfig::no_retry())
            .with_history_limit(3),
    );
    h.client.start(ENDPOINT).await.unwrap();
    let server = h.server().await;

    server.send(&initial_data()).await;
    for value in 80..85 {
        server.send(&heart_rate_delta(value)).await;
    }
    h.messages(6).await;

    let history = h.client.history(100, false);
    assert_eq!(history.len(), 3);
    assert!(history[0].raw.contains("84"));
    assert_eq!(h.client.metrics().messages_received, 6);
}

#[tokio::test(start_paused = true)]
async fn unclean_close_retries_with_backoff_then_gives_up_once() {
    let mut h = Harness::new(ClientConfig::new(ENDPOINT).with_retry(RetryConfig::new(5)));
    h.client.start(ENDPOINT).await.unwrap();
    let server = h.server().await;
    h.connector.refuse(true);
    drop(server);

    let event = h.event(EventTopic::Disconnected).await;
    assert!(matches!(event, ClientEvent::Disconnected { clean: false, .. }));

    let mut delays = Vec::new();
    loop {
        match h.event(EventTopic::Reconnecting).await {
            ClientEvent::Reconnecting { attempt, delay } => {
                assert_eq!(attempt as usize, delays.len() + 1);
                delays.push(delay.as_secs());
                if attempt == 5 {
                    break;
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    assert_eq!(delays, vec![1, 2, 4, 8, 16]);

    let event = h.event(EventTopic::MaxReconnectReached).await;
    assert!(matches!(event, ClientEvent::MaxReconnectReached { attempts: 5 }));
    assert_eq!(h.client.phase(), ConnectionPhase::Failed);
    assert_eq!(h.client.failure(), Some(ClientError::MaxReconnectReached(5)));
    assert_eq!(
        h.client.request_full_data().await,
        Err(ClientError::MaxReconnectReached(5))
    );
    assert_eq!(h.connector.attempts(), 6);

    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(h.connector.attempts(), 6);
    while let Some(event) = h.events.try_next() {
        assert!(!event.matches(EventTopic::MaxReconnectReached));
        assert!(!event.matches(EventTopic::Reconnecting));
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_restores_an_active_link() {
    let mut h = Harness::new(ClientConfig::new(ENDPOINT).with_retry(RetryConfig::new(5)));
    h.client.start(ENDPOINT).await.unwrap();
    h.event(EventTopic::Connected).await;
    let server = h.server().await;
    drop(server);

    h.event(EventTopic::Reconnecting).await;
    h.event(EventTopic::Connected).await;
    let server = h.server().await;
    assert!(h.client.is_connected());
    assert!(!h.client.is_paused());
    assert_eq!(h.client.metrics().reconnect_attempts, 0);

    server.send(&initial_data()).await;
    h.event(EventTopic::InitialData).await;
    assert!(h.client.mirror().is_some());
}

#[tokio::test(start_paused = true)]
async fn clean_close_never_reconnects() {
    let mut h = Harness::new(ClientConfig::new(ENDPOINT).with_retry(RetryConfig::new(5)));
    h.client.start(ENDPOINT).await.unwrap();
    let server = h.server().await;
    server.tx.send(Frame::close_normal("Server shutdown")).await.unwrap();

    match h.event(EventTopic::Disconnected).await {
        ClientEvent::Disconnected { code, reason, clean } => {
            assert_eq!(code, NORMAL_CLOSE);
            assert_eq!(reason, "Server shutdown");
            assert!(clean);
        }
        other => panic!("unexpected {other:?}"),
    }
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.attempts(), 1);
    assert_eq!(h.client.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_cleanly_and_stays_down() {
    let mut h = Harness::new(ClientConfig::new(ENDPOINT).with_retry(RetryConfig::new(5)));
    h.client.start(ENDPOINT).await.unwrap();
    let mut server = h.server().await;

    h.client.disconnect().await;
    match server.frame().await {
        Frame::Close { code, reason } => {
            assert_eq!(code, NORMAL_CLOSE);
            assert_eq!(reason, DISCONNECT_REASON);
        }
        other => panic!("expected close, got {other:?}"),
    }
    drop(server);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.connector.attempts(), 1);
    assert!(!h.client.is_connected());
    assert_eq!(
        h.client.request_full_data().await,
        Err(ClientError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn requests_need_a_link() {
    let h = Harness::no_retry();
    assert_eq!(
        h.client.set_update_mode(UpdateMode::Hybrid).await,
        Err(ClientError::NotConnected)
    );
    assert_eq!(h.client.mode(), UpdateMode::Full);
    assert_eq!(
        h.client.request_performance_metrics().await,
        Err(ClientError::NotConnected)
    );
}

#[tokio::test(start_paused = true)]
async fn requests_reach_the_server() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let mut server = h.server().await;

    h.client.set_update_mode(UpdateMode::Hybrid).await.unwrap();
    h.client.request_full_data().await.unwrap();
    h.client.request_performance_metrics().await.unwrap();

    assert_eq!(
        server.request().await,
        ClientMessage::SetUpdateMode {
            mode: UpdateMode::Hybrid
        }
    );
    assert_eq!(server.request().await, ClientMessage::RequestFullData);
    assert_eq!(server.request().await, ClientMessage::GetPerformanceMetrics);
}

#[tokio::test(start_paused = true)]
async fn reset_while_active_requests_initial_data_once() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let mut server = h.server().await;
    server.send(&initial_data()).await;
    server.send(&heart_rate_delta(90)).await;
    h.messages(2).await;

    assert_eq!(h.client.reset().await.unwrap(), ResetAction::Requested);
    let metrics = h.client.metrics();
    assert_eq!(metrics.messages_received, 0);
    assert_eq!(metrics.data_received, 0);
    assert_eq!(metrics.runtime_ms, 0);
    assert!(h.client.history(100, false).is_empty());
    assert!(h.client.mirror().is_none());

    assert_eq!(server.request().await, ClientMessage::RequestInitialData);
    settle().await;
    assert!(server.rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn reset_while_paused_resumes_and_requests() {
    let mut h = Harness::no_retry();
    h.client.connect(ENDPOINT).await.unwrap();
    let mut server = h.server().await;

    assert_eq!(h.client.reset().await.unwrap(), ResetAction::Resumed);
    assert!(!h.client.is_paused());
    assert_eq!(server.request().await, ClientMessage::RequestInitialData);
    settle().await;
    assert!(server.rx.try_recv().is_err());

    server.send(&initial_data()).await;
    h.event(EventTopic::InitialData).await;
    assert!(h.client.mirror().is_some());
}

#[tokio::test(start_paused = true)]
async fn back_to_back_resets_each_request_once_and_stay_active() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let mut server = h.server().await;
    server.send(&initial_data()).await;
    server.send(&heart_rate_delta(80)).await;
    h.messages(2).await;
    assert!(h.client.pause());

    assert_eq!(h.client.reset().await.unwrap(), ResetAction::Resumed);
    assert_eq!(h.client.reset().await.unwrap(), ResetAction::Requested);
    assert!(!h.client.is_paused());
    assert!(h.client.is_connected());

    assert_eq!(server.request().await, ClientMessage::RequestInitialData);
    assert_eq!(server.request().await, ClientMessage::RequestInitialData);
    settle().await;
    assert!(server.rx.try_recv().is_err());

    server.send(&initial_data()).await;
    server.send(&heart_rate_delta(95)).await;
    h.messages(2).await;

    let metrics = h.client.metrics();
    assert_eq!(metrics.messages_received, 2);
    let history = h.client.history(100, false);
    let kinds: Vec<_> = history.iter().map(|entry| entry.message_type.as_str()).collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&"initial_data"));
    assert!(kinds.contains(&"delta_update"));
    let mirror = h.client.mirror().unwrap();
    let patient = mirror.entity("patients", "P001").unwrap();
    assert_eq!(patient["vitals"]["heartRate"], json!(95));
}

#[tokio::test(start_paused = true)]
async fn reset_while_disconnected_starts_a_new_link() {
    let mut h = Harness::no_retry();
    h.client.start(ENDPOINT).await.unwrap();
    let _first = h.server().await;
    h.client.disconnect().await;

    assert_eq!(h.client.reset().await.unwrap(), ResetAction::Reconnected);
    let mut server = h.server().await;
    assert!(h.client.is_connected());
    assert!(!h.client.is_paused());
    assert_eq!(h.connector.attempts(), 2);

    settle().await;
    assert!(server.rx.try_recv().is_err());
    let _ = h.event(EventTopic::DataReset).await;
}

#[tokio::test(start_paused = true)]
async fn failed_connect_reports_an_error() {
    let mut h = Harness::no_retry();
    h.connector.refuse(true);
    let err = h.client.connect(ENDPOINT).await.unwrap_err();
    assert!(matches!(err, ClientError::Connect(_)));
    assert!(matches!(h.event(EventTopic::Error).await, ClientEvent::Error(_)));
    assert_eq!(h.client.phase(), ConnectionPhase::Disconnected);
}
