//! # VitalSync Client
//!
//! Reconnecting client that mirrors a VitalSync server's entity state.
//!
//! This crate provides:
//! - A local mirror that applies snapshots and field patches
//! - Pause/resume with an active-time clock
//! - Data and raw-frame metrics normalized by runtime and uptime
//! - A bounded message history
//! - Reconnection with exponential backoff
//! - Typed event subscriptions
//! - A transport abstraction with a WebSocket implementation
//!
//! ## Key Invariants
//!
//! - A new connection starts paused; paused frames never touch the mirror
//!   or the data counters
//! - Runtime never exceeds uptime
//! - A clean close never reconnects; an unclean one retries up to the
//!   configured ceiling and then reports failure once
//! - A reset requests exactly one fresh `initial_data`
//!
//! ```rust,ignore
//! use vitalsync_client::{ClientConfig, SyncClient};
//! use vitalsync_protocol::UpdateMode;
//!
//! let client = SyncClient::websocket(ClientConfig::default());
//! client.start("ws://127.0.0.1:8080").await?;
//! client.set_update_mode(UpdateMode::Delta).await?;
//! let metrics = client.metrics();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod clock;
mod config;
mod error;
mod events;
mod history;
mod metrics;
mod mirror;
mod transport;

pub use client::{ConnectionPhase, ResetAction, SyncClient, ABNORMAL_CLOSE, DISCONNECT_REASON};
pub use clock::RuntimeClock;
pub use config::{ClientConfig, RetryConfig, DEFAULT_ENDPOINT};
pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, EventStream, EventTopic};
pub use history::{HistoryEntry, MessageHistory};
pub use metrics::{ClientMetrics, MetricsSnapshot};
pub use mirror::{ClientMirror, MirrorUpdate};
pub use transport::{Connector, Duplex, WebSocketConnector};
