use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use shardmesh::config::{init_tracing, load_config};
use shardmesh::peer::StoragePeer;

/// Runs a storage peer that persists chunks to local disk and
/// heartbeats the master.
#[derive(Parser, Debug)]
#[command(name = "shardmesh-peer", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides `[peer].listen_addr` from the config file.
    #[arg(short, long)]
    addr: Option<String>,

    /// Overrides `[peer].data_path` from the config file.
    #[arg(short, long)]
    data_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    let _log_guard = init_tracing(&config.common);

    let listen_addr = args.addr.unwrap_or(config.peer.listen_addr.clone());
    let data_path = args.data_path.unwrap_or(config.peer.data_path.clone());
    let (host, port_str) = listen_addr
        .rsplit_once(':')
        .expect("listen address must be host:port");
    let port: u16 = port_str.parse().expect("invalid port in listen address");

    let listener = TcpListener::bind(&listen_addr).await?;
    info!(listen_addr, data_path, "storage peer listening");

    let peer = Arc::new(StoragePeer::new(data_path, host, port, config.common));
    peer.ensure_storage_dir().await?;
    peer.spawn_heartbeat_loop();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
        shutdown_signal.store(true, Ordering::Relaxed);
    });

    peer.serve(listener, shutdown).await;
    Ok(())
}
