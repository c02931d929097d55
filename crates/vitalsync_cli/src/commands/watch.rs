//! Watch command implementation.

use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};
use vitalsync_client::{
    ClientConfig, ClientError, ClientEvent, EventTopic, MetricsSnapshot, SyncClient,
};
use vitalsync_protocol::UpdateMode;

/// Options for a watch session.
#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Server URL.
    pub endpoint: String,
    /// Mode to request after connecting.
    pub mode: UpdateMode,
    /// Stop after this long, or run until Ctrl-C.
    pub duration: Option<Duration>,
    /// Time between summaries.
    pub interval: Duration,
    /// Print summaries as JSON.
    pub json: bool,
}

/// Connects, switches mode and prints metrics until told to stop.
pub async fn run(options: WatchOptions) -> Result<(), Box<dyn std::error::Error>> {
    let client = SyncClient::websocket(ClientConfig::new(options.endpoint.clone()));
    let mut failures = client.subscribe_to(&[EventTopic::MaxReconnectReached]);

    client.start(&options.endpoint).await?;
    if options.mode != UpdateMode::default() {
        client.set_update_mode(options.mode).await?;
    }

    let deadline = options.duration.map(|d| Instant::now() + d);
    let mut summaries = interval_at(Instant::now() + options.interval, options.interval);
    summaries.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let outcome: Result<(), Box<dyn std::error::Error>> = loop {
        tokio::select! {
            _ = summaries.tick() => print_summary(&client.metrics(), options.json)?,
            _ = sleep_until(deadline) => break Ok(()),
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "cannot listen for Ctrl-C");
                }
                break Ok(());
            }
            event = failures.next() => match event {
                Some(ClientEvent::MaxReconnectReached { attempts }) => {
                    break Err(ClientError::MaxReconnectReached(attempts).into());
                }
                Some(_) => {}
                None => break Ok(()),
            },
        }
    };

    let metrics = client.metrics();
    client.disconnect().await;
    info!("watch finished");
    print_summary(&metrics, options.json)?;
    outcome
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn print_summary(metrics: &MetricsSnapshot, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", serde_json::to_string(metrics)?);
        return Ok(());
    }
    let state = match (metrics.is_connected, metrics.is_paused) {
        (false, _) => "disconnected",
        (true, true) => "paused",
        (true, false) => "active",
    };
    let frequency = metrics
        .update_frequency
        .map(|hz| format!("{hz:.2}/s"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "[{state}] mode={} messages={} bytes={} avg={:.0}B rate={} runtime={:.1}s uptime={:.1}s throughput={:.0}B/s",
        metrics.current_mode,
        metrics.messages_received,
        metrics.data_received,
        metrics.average_message_size,
        frequency,
        metrics.runtime().as_secs_f64(),
        metrics.uptime().as_secs_f64(),
        metrics.average_data_per_second,
    );
    Ok(())
}
