//! Connection manager behaviour over in-memory frame channels.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use vitalsync_core::{EntityStore, MutationConfig};
use vitalsync_protocol::{
    ClientMessage, Frame, HybridUpdateType, NextCycle, ServerMessage, Snapshot, UpdateMode,
    NORMAL_CLOSE, TRY_AGAIN_LATER,
};
use vitalsync_server::{
    ConnectionManager, HandlerContext, ServerConfig, ServerError, ServerResult, SHUTDOWN_REASON,
};

const WAIT: Duration = Duration::from_secs(5);

fn manager_with(config: ServerConfig) -> Arc<ConnectionManager> {
    let store = EntityStore::ward(MutationConfig::new().with_selection(1.0, 1.0).with_seed(42))
        .unwrap();
    let config = config.with_tick_interval(Duration::from_secs(3600));
    ConnectionManager::new(Arc::new(HandlerContext::new(config, Arc::new(store))))
}

fn manager() -> Arc<ConnectionManager> {
    manager_with(ServerConfig::default())
}

struct Peer {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
    task: JoinHandle<ServerResult<()>>,
}

impl Peer {
    fn connect(manager: &Arc<ConnectionManager>) -> Self {
        let (to_server, from_peer) = mpsc::channel(64);
        let (to_peer, from_server) = mpsc::channel(64);
        let manager = Arc::clone(manager);
        let task = tokio::spawn(async move { manager.serve(to_peer, from_peer).await });
        Self {
            tx: to_server,
            rx: from_server,
            task,
        }
    }

    async fn frame(&mut self) -> Frame {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("server dropped the connection")
    }

    async fn message(&mut self) -> ServerMessage {
        match self.frame().await {
            Frame::Text(text) => ServerMessage::decode(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    async fn send(&self, message: ClientMessage) {
        self.tx.send(Frame::Text(message.encode().unwrap())).await.unwrap();
    }

    async fn send_raw(&self, text: &str) {
        self.tx.send(Frame::Text(text.to_string())).await.unwrap();
    }

    async fn set_mode(&mut self, mode: UpdateMode) {
        self.send(ClientMessage::SetUpdateMode { mode }).await;
        match self.message().await {
            ServerMessage::ModeChanged { mode: acked, .. } => assert_eq!(acked, mode),
            other => panic!("expected mode_changed, got {other:?}"),
        }
    }

    async fn metrics(&mut self) -> vitalsync_protocol::PerformanceReport {
        self.send(ClientMessage::GetPerformanceMetrics).await;
        match self.message().await {
            ServerMessage::PerformanceMetrics { data, .. } => data,
            other => panic!("expected performance_metrics, got {other:?}"),
        }
    }

    async fn finished(self) -> ServerResult<()> {
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("serve did not return")
            .unwrap()
    }
}

fn tick(manager: &ConnectionManager) {
    assert!(manager.context().clock.tick_now().is_some());
}

#[tokio::test]
async fn connect_sends_initial_data_then_full_updates() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);

    let initial = peer.message().await;
    assert_eq!(initial.message_type(), "initial_data");
    assert_eq!(initial.snapshot().unwrap().entity_count(), 60);
    assert_eq!(manager.connection_count(), 1);

    tick(&manager);
    let update = peer.message().await;
    assert_eq!(update.message_type(), "full_data_update");
}

#[tokio::test]
async fn delta_mirror_tracks_store() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    let mut mirror: Snapshot = peer.message().await.snapshot().unwrap().clone();
    peer.set_mode(UpdateMode::Delta).await;

    for _ in 0..5 {
        tick(&manager);
        let message = peer.message().await;
        assert_eq!(message.message_type(), "delta_update");
        let report = message.patch().unwrap().apply_to(&mut mirror);
        assert_eq!(report.skipped, 0);
        assert!(mirror.collections_eq(&manager.context().store.snapshot()));
    }
}

#[tokio::test]
async fn hybrid_updates_alternate_and_preview_next_phase() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;
    peer.set_mode(UpdateMode::Hybrid).await;

    for _ in 0..6 {
        tick(&manager);
    }
    // Six ticks give three full cycles; critical ticks may be suppressed.
    let mut full_cycles = 0;
    while full_cycles < 3 {
        let ServerMessage::HybridUpdate {
            update_type,
            changes,
            cycle,
            data_reduction,
            ..
        } = peer.message().await
        else {
            panic!("expected hybrid_update");
        };
        match update_type {
            HybridUpdateType::FullCycle => {
                assert_eq!(cycle, NextCycle::NextCritical);
                assert!(!data_reduction);
                full_cycles += 1;
            }
            HybridUpdateType::CriticalOnly => {
                assert_eq!(cycle, NextCycle::NextFull);
                assert!(data_reduction);
                for (_, _, path, _) in changes.iter() {
                    assert!(matches!(path.as_str(), "vitals.heartRate" | "vitals.spo2"));
                }
            }
        }
    }
}

#[tokio::test]
async fn meta_messages_are_not_counted() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;
    peer.set_mode(UpdateMode::Delta).await;

    let first = peer.metrics().await;
    assert_eq!(first.client.messages_sent, 1);
    assert_eq!(first.client.current_mode, UpdateMode::Delta);
    assert_eq!(first.server.total_messages_sent, 1);
    assert_eq!(first.server.active_connections, 1);

    let second = peer.metrics().await;
    assert_eq!(second.client.messages_sent, 1);
    assert_eq!(second.client.data_sent, first.client.data_sent);
}

#[tokio::test]
async fn data_is_counted_when_queued_not_when_read() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    let Frame::Text(initial) = peer.frame().await else {
        panic!("expected initial_data");
    };
    let mut bytes = initial.len() as u64;
    tick(&manager);
    tick(&manager);

    // Both updates are counted while they sit unread in the queue.
    tokio::time::timeout(WAIT, async {
        while manager.context().metrics.messages_sent() < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("updates were never counted");

    peer.send(ClientMessage::GetPerformanceMetrics).await;
    for _ in 0..2 {
        let Frame::Text(text) = peer.frame().await else {
            panic!("expected text");
        };
        bytes += text.len() as u64;
    }
    let report = match peer.message().await {
        ServerMessage::PerformanceMetrics { data, .. } => data,
        other => panic!("expected performance_metrics, got {other:?}"),
    };
    assert_eq!(report.client.messages_sent, 3);
    assert_eq!(report.client.data_sent, bytes);
    assert_eq!(report.server.total_data_sent, bytes);
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_ignored() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    peer.send_raw("not json").await;
    peer.send_raw(r#"{"type":"subscribe_everything"}"#).await;
    peer.send_raw(r#"{"type":"set_update_mode","mode":"turbo"}"#).await;

    let report = peer.metrics().await;
    assert_eq!(report.client.current_mode, UpdateMode::Full);
    assert_eq!(manager.connection_count(), 1);
}

#[tokio::test]
async fn request_full_data_replies_with_realtime_snapshot() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    peer.send(ClientMessage::RequestFullData).await;
    let message = peer.message().await;
    assert_eq!(message.message_type(), "full_data");
    let data = message.snapshot().unwrap();
    let patient = data.entity("patients", "P001").unwrap();
    assert!(patient.get("vitals").is_some());
    assert!(patient.get("labResults").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_data_replies_never_overtake_periodic_updates() {
    let manager = manager_with(ServerConfig::default().with_tick_capacity(64));
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    for _ in 0..20 {
        peer.send(ClientMessage::RequestFullData).await;
        tick(&manager);
        tokio::task::yield_now().await;
    }

    // Every snapshot message replaces the mirror; the last one must match
    // the store once the stream goes quiet.
    let mut replies = 0;
    let mut last = None;
    while let Ok(Some(frame)) =
        tokio::time::timeout(Duration::from_millis(300), peer.rx.recv()).await
    {
        let Frame::Text(text) = frame else {
            panic!("unexpected close");
        };
        let message = ServerMessage::decode(&text).unwrap();
        if message.message_type() == "full_data" {
            replies += 1;
        }
        if let Some(snapshot) = message.snapshot() {
            last = Some(snapshot.clone());
        }
    }

    assert_eq!(replies, 20);
    let last = last.expect("no snapshot received");
    assert!(last.collections_eq(&manager.context().store.realtime_snapshot()));
}

#[tokio::test]
async fn regeneration_resyncs_every_connection() {
    let manager = manager();
    let mut a = Peer::connect(&manager);
    let mut b = Peer::connect(&manager);
    a.message().await;
    b.message().await;

    a.send(ClientMessage::RequestInitialData).await;
    assert_eq!(a.message().await.message_type(), "initial_data");
    assert_eq!(manager.context().store.generation(), 1);

    tick(&manager);
    assert_eq!(a.message().await.message_type(), "full_data_update");
    let resync = b.message().await;
    assert_eq!(resync.message_type(), "initial_data");
    assert!(resync
        .snapshot()
        .unwrap()
        .collections_eq(&manager.context().store.snapshot()));
}

#[tokio::test]
async fn send_failure_releases_connection() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    let Peer { tx, rx, task } = peer;
    drop(rx);
    tick(&manager);

    let result = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ServerError::ConnectionClosed)));
    assert_eq!(manager.connection_count(), 0);
    assert_eq!(manager.context().metrics.active_connections(), 0);
    drop(tx);
}

#[tokio::test]
async fn peer_close_ends_serve_cleanly() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    peer.tx.send(Frame::close_normal("Client disconnect")).await.unwrap();
    assert!(peer.finished().await.is_ok());
    assert_eq!(manager.connection_count(), 0);
}

#[tokio::test]
async fn connection_limit_refuses_extra_peers() {
    let manager = manager_with(ServerConfig::default().with_max_connections(1));
    let mut first = Peer::connect(&manager);
    first.message().await;

    let mut second = Peer::connect(&manager);
    match second.frame().await {
        Frame::Close { code, .. } => assert_eq!(code, TRY_AGAIN_LATER),
        other => panic!("expected close, got {other:?}"),
    }
    assert!(matches!(
        second.finished().await,
        Err(ServerError::ConnectionLimit(1))
    ));
    assert_eq!(manager.connection_count(), 1);
}

#[tokio::test]
async fn shutdown_closes_connections_cleanly() {
    let manager = manager();
    let mut peer = Peer::connect(&manager);
    peer.message().await;

    manager.shutdown(WAIT).await;
    match peer.frame().await {
        Frame::Close { code, reason } => {
            assert_eq!(code, NORMAL_CLOSE);
            assert_eq!(reason, SHUTDOWN_REASON);
        }
        other => panic!("expected close, got {other:?}"),
    }
    assert!(peer.finished().await.is_ok());
    assert_eq!(manager.connection_count(), 0);
    assert!(!manager.context().clock.is_running());
}
