//! ntsync - NetworkTables 3.0 client
//!
//! Connects to a server, waits for the initial table sync, then runs one
//! command against the mirrored table.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use ntsync_client::{Client, ConnectionConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ntsync")]
#[command(about = "Command-line client for NetworkTables 3.0 servers")]
#[command(version)]
struct Cli {
    /// Server host
    #[arg(short = 'H', long, env = "NTSYNC_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(short, long, env = "NTSYNC_PORT", default_value_t = ntsync_protocol::DEFAULT_PORT)]
    port: u16,

    /// Identity announced to the server
    #[arg(short, long, env = "NTSYNC_IDENTITY", default_value = ntsync_protocol::DEFAULT_IDENTITY)]
    identity: String,

    /// Seconds to wait for the initial sync
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Value type for `put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValueKind {
    Bool,
    Double,
    String,
    BoolArray,
    DoubleArray,
    StringArray,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the value of one key
    Get {
        /// Entry name
        key: String,
    },

    /// List keys under a prefix
    Keys {
        /// Name prefix
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print every entry under a prefix
    Dump {
        /// Name prefix
        #[arg(default_value = "")]
        prefix: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create or update a key
    Put {
        /// Entry name
        key: String,

        /// Value (arrays are comma separated)
        value: String,

        /// Value type
        #[arg(short = 'T', long = "type", value_enum, default_value = "string")]
        kind: ValueKind,

        /// Mark the entry persistent
        #[arg(long)]
        persistent: bool,
    },

    /// Delete a key
    Delete {
        /// Entry name
        key: String,
    },

    /// Delete every key on the server
    ClearAll,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = ConnectionConfig::from_env();
    config.host = cli.host;
    config.port = cli.port;
    config.identity = cli.identity;

    tracing::info!("Connecting to {}", config.address());
    let client = Client::connect_with(config).await.map_err(|e| {
        eprintln!("{}: {}", "Connection failed".red(), e);
        e
    })?;

    if let Err(e) = client
        .wait_until_synced(Duration::from_secs(cli.timeout))
        .await
    {
        eprintln!("{}: {}", "Sync failed".red(), e);
        return Err(e.into());
    }

    let result = commands::execute(&client, cli.command).await;
    client.close().await?;

    match result {
        Ok(output) => {
            if !output.is_empty() {
                println!("{}", output);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
