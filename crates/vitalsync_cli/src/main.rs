//! VitalSync CLI
//!
//! Runs a VitalSync server or watches one from the terminal.
//!
//! # Commands
//!
//! - `serve` - Run the WebSocket server until Ctrl-C
//! - `watch` - Connect a client and print transfer metrics

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vitalsync_client::DEFAULT_ENDPOINT;
use vitalsync_protocol::UpdateMode;

/// VitalSync server and client tools.
#[derive(Parser)]
#[command(name = "vitalsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Mutation period in milliseconds
        #[arg(short, long, default_value = "5000")]
        tick_ms: u64,

        /// Seed for reproducible data
        #[arg(short, long)]
        seed: Option<u64>,

        /// Maximum concurrent connections
        #[arg(short, long, default_value = "1000")]
        max_connections: usize,
    },

    /// Connect to a server and report what arrives
    Watch {
        /// Server URL
        #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,

        /// Update mode (full, delta, hybrid)
        #[arg(short, long, default_value = "full")]
        mode: UpdateMode,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration_secs: Option<u64>,

        /// Seconds between metric summaries
        #[arg(short, long, default_value = "5")]
        interval_secs: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve {
            bind,
            tick_ms,
            seed,
            max_connections,
        } => {
            if tick_ms == 0 {
                return Err("--tick-ms must be positive".into());
            }
            commands::serve::run(bind, Duration::from_millis(tick_ms), seed, max_connections)
                .await?;
        }
        Commands::Watch {
            endpoint,
            mode,
            duration_secs,
            interval_secs,
            format,
        } => {
            let options = commands::watch::WatchOptions {
                endpoint,
                mode,
                duration: duration_secs.map(Duration::from_secs),
                interval: Duration::from_secs(interval_secs.max(1)),
                json: format == "json",
            };
            commands::watch::run(options).await?;
        }
        Commands::Version => {
            println!("VitalSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn watch_parses_mode_and_defaults() {
        let cli = Cli::parse_from(["vitalsync", "watch", "--mode", "hybrid"]);
        match cli.command {
            Commands::Watch {
                endpoint,
                mode,
                duration_secs,
                ..
            } => {
                assert_eq!(endpoint, DEFAULT_ENDPOINT);
                assert_eq!(mode, UpdateMode::Hybrid);
                assert_eq!(duration_secs, None);
            }
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(Cli::try_parse_from(["vitalsync", "watch", "--mode", "sometimes"]).is_err());
    }

    #[test]
    fn serve_parses_bind_and_seed() {
        let cli = Cli::parse_from(["vitalsync", "-v", "serve", "--bind", "0.0.0.0:9000", "--seed", "7"]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve { bind, seed, tick_ms, .. } => {
                assert_eq!(bind.port(), 9000);
                assert_eq!(seed, Some(7));
                assert_eq!(tick_ms, 5000);
            }
            _ => panic!("expected serve"),
        }
    }
}
