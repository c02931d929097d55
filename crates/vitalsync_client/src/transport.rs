//! Transport layer abstraction for the sync client.

use crate::error::{ClientError, ClientResult};
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;
use vitalsync_protocol::Frame;

/// Frames buffered in each direction of a WebSocket link.
const LINK_CAPACITY: usize = 64;

/// Close code reported when the peer's close frame carried none.
const NO_STATUS: u16 = 1005;

/// Both directions of an open connection.
///
/// The link is unclean-closed when `inbound` ends without a close frame.
#[derive(Debug)]
pub struct Duplex {
    /// Frames to the server.
    pub outbound: mpsc::Sender<Frame>,
    /// Frames from the server.
    pub inbound: mpsc::Receiver<Frame>,
}

/// Opens connections to a server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (WebSocket, in-process loopback, scripted fakes).
pub trait Connector: Send + Sync + 'static {
    /// Opens a connection to `endpoint`. Resolves once the link is open.
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, ClientResult<Duplex>>;
}

/// Connector over real WebSocket sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect<'a>(&'a self, endpoint: &'a str) -> BoxFuture<'a, ClientResult<Duplex>> {
        async move {
            let (socket, _) = tokio_tungstenite::connect_async(endpoint)
                .await
                .map_err(|err| ClientError::Connect(err.to_string()))?;
            let (mut sink, mut source) = socket.split();
            let (out_tx, mut out_rx) = mpsc::channel::<Frame>(LINK_CAPACITY);
            let (in_tx, in_rx) = mpsc::channel::<Frame>(LINK_CAPACITY);

            tokio::spawn(async move {
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

            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    let frame = match message {
                        Ok(Message::Text(text)) => Frame::Text(text),
                        Ok(Message::Close(close)) => Frame::Close {
                            code: close.as_ref().map_or(NO_STATUS, |c| u16::from(c.code)),
                            reason: close.map(|c| c.reason.into_owned()).unwrap_or_default(),
                        },
                        Ok(_) => continue,
                        Err(err) => {
                            debug!(error = %err, "websocket read failed");
                            break;
                        }
                    };
                    let closing = matches!(frame, Frame::Close { .. });
                    if in_tx.send(frame).await.is_err() || closing {
                        break;
                    }
                }
            });

            Ok(Duplex {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        // Port 9 (discard) is essentially never listening for websockets.
        let err = WebSocketConnector
            .connect("ws://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect(_)));
        assert!(err.is_retryable());
    }
}
