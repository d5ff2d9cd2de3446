use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use shardmesh::config::{init_tracing, load_config};
use shardmesh::master::Master;

/// Runs the control-plane master for a shardmesh cluster.
#[derive(Parser, Debug)]
#[command(name = "shardmesh-master", version)]
struct Args {
    /// Path to the TOML config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides `[master].listen_addr` from the config file.
    #[arg(short, long)]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)?;
    let _log_guard = init_tracing(&config.common);

    let listen_addr = args.addr.unwrap_or(config.master.listen_addr.clone());
    let listener = TcpListener::bind(&listen_addr).await?;
    info!(listen_addr, "master listening");

    let master = Arc::new(Master::new(config.common));
    master.spawn_failure_detector();
    master.spawn_replication_monitor();

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_signal = Arc::clone(&shutdown);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, shutting down");
        shutdown_signal.store(true, Ordering::Relaxed);
    });

    master.serve(listener, shutdown).await;
    Ok(())
}
