//! # VitalSync Server
//!
//! WebSocket server that keeps remote mirrors of a mutating entity store in
//! sync.
//!
//! This crate provides:
//! - A shared mutation clock driving the entity store
//! - Per-connection mode schedulers (`full`, `delta`, `hybrid`)
//! - The connection manager and control-message handlers
//! - A WebSocket listener
//!
//! # Architecture
//!
//! One [`MutationClock`] ticks the shared [`EntityStore`] and broadcasts each
//! tick. Every connection runs its own scheduler task that renders the tick
//! for the connection's mode and queues the result. Control messages stop
//! the scheduler, act, and start it again, so nothing a handler sends can
//! interleave with a periodic update.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vitalsync_core::{EntityStore, MutationConfig};
//! use vitalsync_server::{ServerConfig, SyncServer};
//!
//! let store = Arc::new(EntityStore::ward(MutationConfig::default())?);
//! let server = SyncServer::new(ServerConfig::default(), store);
//! let listener = server.bind().await?;
//! server.run(listener, shutdown_token).await?;
//! ```
//!
//! [`EntityStore`]: vitalsync_core::EntityStore

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod clock;
mod config;
mod connection;
mod error;
mod handler;
mod metrics;
mod scheduler;
mod server;

pub use clock::MutationClock;
pub use config::{ServerConfig, DEFAULT_CRITICAL_PATHS};
pub use connection::{Connection, ConnectionManager, SHUTDOWN_REASON};
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use metrics::{ServerMetrics, TransferMetrics};
pub use scheduler::ModeScheduler;
pub use server::SyncServer;
