//! WebSocket listener.

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::ServerResult;
use crate::handler::HandlerContext;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vitalsync_core::EntityStore;
use vitalsync_protocol::Frame;

/// Close code reported when the peer's close frame carried none.
const NO_STATUS: u16 = 1005;

/// The sync server.
///
/// Accepts WebSocket connections and hands each one to the
/// [`ConnectionManager`].
///
/// # Example
///
/// ```rust,ignore
/// use vitalsync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default(), store);
/// let listener = server.bind().await?;
/// server.run(listener, shutdown).await?;
/// ```
#[derive(Debug)]
pub struct SyncServer {
    manager: Arc<ConnectionManager>,
}

impl SyncServer {
    /// Creates a new sync server over `store`.
    pub fn new(config: ServerConfig, store: Arc<EntityStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        Self {
            manager: ConnectionManager::new(context),
        }
    }

    /// Returns the connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.manager.context().config
    }

    /// Binds the configured address.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        let listener = TcpListener::bind(self.config().bind_addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        Ok(listener)
    }

    /// Accepts connections until `shutdown` fires, then shuts the manager
    /// down, closing every connection cleanly.
    pub async fn run(&self, listener: TcpListener, shutdown: CancellationToken) -> ServerResult<()> {
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        continue;
                    }
                },
            };
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                if let Err(err) = handle_socket(manager, stream, peer).await {
                    debug!(%peer, error = %err, "socket ended with error");
                }
            });
        }

        self.manager.shutdown(self.config().send_timeout).await;
        info!("server stopped");
        Ok(())
    }
}

/// Pumps one WebSocket into a pair of frame channels served by `manager`.
async fn handle_socket(
    manager: Arc<ConnectionManager>,
    stream: TcpStream,
    peer: SocketAddr,
) -> ServerResult<()> {
    let socket = tokio_tungstenite::accept_async(stream).await?;
    debug!(%peer, "websocket handshake complete");
    let (mut sink, mut source) = socket.split();

    let capacity = manager.context().config.outbound_capacity;
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(capacity);
    let (in_tx, in_rx) = mpsc::channel::<Frame>(capacity);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text),
                Frame::Close { code, reason } => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            };
            if sink.send(message).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let reader = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let frame = match message {
                Ok(Message::Text(text)) => Frame::Text(text),
                Ok(Message::Close(close)) => Frame::Close {
                    code: close.as_ref().map_or(NO_STATUS, |c| u16::from(c.code)),
                    reason: close.map(|c| c.reason.into_owned()).unwrap_or_default(),
                },
                Ok(_) => continue,
                Err(err) => {
                    debug!(%peer, error = %err, "websocket read failed");
                    break;
                }
            };
            let closing = matches!(frame, Frame::Close { .. });
            if in_tx.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    let served = manager.serve(out_tx, in_rx).await;
    reader.abort();
    let _ = tokio::time::timeout(Duration::from_secs(1), writer).await;
    served
}
