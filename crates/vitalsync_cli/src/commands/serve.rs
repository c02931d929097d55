//! Serve command implementation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vitalsync_core::{EntityStore, MutationConfig};
use vitalsync_server::{ServerConfig, SyncServer};

/// Runs the server until Ctrl-C.
pub async fn run(
    bind: SocketAddr,
    tick: Duration,
    seed: Option<u64>,
    max_connections: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut mutation = MutationConfig::new();
    if let Some(seed) = seed {
        mutation = mutation.with_seed(seed);
    }
    let store = Arc::new(EntityStore::ward(mutation)?);

    let config = ServerConfig::default()
        .with_bind_addr(bind)
        .with_tick_interval(tick)
        .with_max_connections(max_connections);
    let server = SyncServer::new(config, store);
    let listener = server.bind().await?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C, shutting down"),
        }
        trigger.cancel();
    });

    server.run(listener, shutdown).await?;

    let report = server.manager().context().metrics.report();
    let stats = server.manager().context().store.stats();
    println!("Connections served: {}", report.total_connections);
    println!("Data messages sent: {}", report.total_messages_sent);
    println!("Data bytes sent:    {}", report.total_data_sent);
    println!(
        "Mutation passes:    {} ({} changes, {} empty)",
        stats.passes, stats.changes, stats.empty_passes
    );
    println!("Regenerations:      {}", stats.regenerations);
    Ok(())
}
