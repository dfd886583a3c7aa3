//! Chainlet node CLI

use chainlet::{Node, NodeConfig};
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "chainlet-node")]
#[command(about = "A peer-to-peer ledger node with magic-number mining")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Port to listen on (0 picks a free one)
    #[arg(short, long, default_value_t = 0)]
    port: u16,

    /// Host to listen on and advertise to peers
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Peers to join at startup, as host:port
    #[arg(long, num_args = 0..)]
    peers: Vec<String>,

    /// Idle seconds before each maintenance cycle
    #[arg(long, default_value_t = 5)]
    listen_timeout_secs: u64,

    /// Forget a peer after this many failed deliveries in a row
    #[arg(long)]
    evict_after: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .init();

    let config = NodeConfig {
        host: cli.host,
        port: cli.port,
        peers: cli.peers,
        listen_timeout: Duration::from_secs(cli.listen_timeout_secs),
        evict_after_failures: cli.evict_after,
        ..NodeConfig::default()
    };

    let node = Node::builder().with_config(config).start().await?;
    info!("Node {} listening on {}", node.id(), node.local_addr());

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("ctrl+c pressed");
                on_signal.cancel();
            },
            Err(e) => warn!("cannot listen for ctrl-c: {}", e),
        }
    });

    node.run(shutdown).await?;
    info!("Node stopped");
    Ok(())
}
