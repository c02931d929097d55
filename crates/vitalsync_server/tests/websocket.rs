//! One real WebSocket session against the listener.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use vitalsync_core::{EntityStore, MutationConfig};
use vitalsync_protocol::{ClientMessage, ServerMessage, UpdateMode};
use vitalsync_server::{ServerConfig, SyncServer};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn websocket_session_round_trip() {
    let store = Arc::new(EntityStore::ward(MutationConfig::new().with_seed(3)).unwrap());
    let config = ServerConfig::default()
        .with_bind_addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .with_tick_interval(Duration::from_secs(3600));
    let server = Arc::new(SyncServer::new(config, store));
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = CancellationToken::new();
    let running = {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(listener, shutdown).await })
    };

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
        .await
        .unwrap();

    let next = |message: Option<Result<Message, _>>| match message {
        Some(Ok(Message::Text(text))) => ServerMessage::decode(&text).unwrap(),
        other => panic!("expected text, got {other:?}"),
    };

    let initial = next(tokio::time::timeout(WAIT, socket.next()).await.unwrap());
    assert_eq!(initial.message_type(), "initial_data");

    let request = ClientMessage::SetUpdateMode {
        mode: UpdateMode::Hybrid,
    };
    socket
        .send(Message::Text(request.encode().unwrap()))
        .await
        .unwrap();
    let ack = next(tokio::time::timeout(WAIT, socket.next()).await.unwrap());
    assert_eq!(
        ack,
        ServerMessage::ModeChanged {
            mode: UpdateMode::Hybrid,
            timestamp: ack.timestamp(),
        }
    );
    assert_eq!(server.manager().connection_count(), 1);

    shutdown.cancel();
    match tokio::time::timeout(WAIT, socket.next()).await.unwrap() {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(frame.code, CloseCode::Normal);
            assert_eq!(frame.reason, "Server shutdown");
        }
        other => panic!("expected close frame, got {other:?}"),
    }

    tokio::time::timeout(WAIT, running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(server.manager().connection_count(), 0);
}
