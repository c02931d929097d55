//! # VitalSync Testkit
//!
//! Test utilities for VitalSync.
//!
//! This crate provides:
//! - Seeded stores and a manually ticked in-process server
//! - A loopback connector wiring a `SyncClient` to a `ConnectionManager`
//!   without sockets
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vitalsync_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn mirror_follows_server() {
//!     let server = TestServer::new(7);
//!     let client = server.client(test_client_config());
//!     client.start(LOOPBACK_ENDPOINT).await.unwrap();
//!     server.tick();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod loopback;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::loopback::*;
}

pub use fixtures::*;
pub use generators::*;
pub use loopback::*;
