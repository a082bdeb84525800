//! TCP message exchange (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌───────────────────────────────────────────────────────┐
//!                 │                    TCP EXCHANGE                        │
//!                 │                                                        │
//!   Inbound       │  ┌──────────┐    ┌──────────┐    ┌──────────────┐      │
//!   ──────────────┼─▶│  accept  │───▶│  worker  │───▶│ message sink │      │
//!                 │  │   loop   │    │ (1/conn) │    │  (serialized)│      │
//!                 │  └──────────┘    └────┬─────┘    └──────┬───────┘      │
//!                 │                       │ protocol        │ pending      │
//!                 │                       │ session         │ reply        │
//!                 │                       ▼                 ▼              │
//!   Outbound      │                 ┌──────────┐    ┌──────────────┐       │
//!   ◀─────────────┼─────────────────│ protocol │◀───│    sender    │       │
//!                 │                 │ session  │    │              │       │
//!                 │                 └──────────┘    └──────────────┘       │
//!                 │                                                        │
//!                 │   config · lifecycle · observability                   │
//!                 └───────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use clap::{Args, Parser, Subcommand};

use tcp_exchange::config::loader::load_config;
use tcp_exchange::config::ExchangeConfig;
use tcp_exchange::exchange::sink::{shared, LogSink};
use tcp_exchange::lifecycle::{signals, startup, Shutdown};
use tcp_exchange::observability::{logging, metrics};
use tcp_exchange::{Destination, Document, ProtocolRegistry};

#[derive(Parser)]
#[command(name = "tcp-exchange")]
#[command(about = "Exchange documents with remote peers over TCP", long_about = None)]
struct Cli {
    /// Configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept connections and log every received document
    Serve,
    /// Send one document and print any reply
    Send(SendArgs),
}

#[derive(Args)]
struct SendArgs {
    /// Destination as tcp://host:port
    destination: Destination,

    /// Document body
    #[arg(short, long, conflicts_with = "file")]
    data: Option<String>,

    /// Read the document body from a file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Wait for a reply on the same connection
    #[arg(long)]
    await_reply: bool,

    /// Reply timeout, overriding the configured one
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ExchangeConfig::default(),
    };
    logging::init_logging(&config.observability.log_level);

    tracing::info!("tcp-exchange v{} starting", env!("CARGO_PKG_VERSION"));

    let registry = ProtocolRegistry::builtin();
    match cli.command {
        Commands::Serve => serve(&config, &registry).await,
        Commands::Send(args) => send(&config, &registry, args).await,
    }
}

async fn serve(
    config: &ExchangeConfig,
    registry: &ProtocolRegistry,
) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let handle =
        startup::start_listener(config, registry, shared(LogSink::new()), &shutdown).await?;

    let trigger = shutdown.clone();
    tokio::spawn(async move {
        signals::wait_for_signal().await;
        tracing::info!("Shutting down");
        trigger.trigger();
    });

    // returns after a signal once all workers are joined, or early on a fatal accept error
    handle.wait().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn send(
    config: &ExchangeConfig,
    registry: &ProtocolRegistry,
    args: SendArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = match (&args.data, &args.file) {
        (Some(data), _) => Bytes::from(data.clone()),
        (None, Some(path)) => Bytes::from(tokio::fs::read(path).await?),
        (None, None) => return Err("one of --data or --file is required".into()),
    };

    let sender = startup::build_sender(config, registry)?;
    let mut document = Document::new(payload);

    let outcome = if args.await_reply {
        let wait = args.timeout_ms.map(Duration::from_millis);
        sender.request(&args.destination, &mut document, wait).await?
    } else {
        sender.send(&args.destination, &mut document).await?
    };

    if let Some(reply) = outcome.reply {
        println!("{}", String::from_utf8_lossy(&reply));
    }
    Ok(())
}
