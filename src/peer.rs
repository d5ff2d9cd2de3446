//! Storage peer (spec §4.2): persists chunk bytes under `storage_dir` by
//! chunk id, serves STORE/RETRIEVE, and heartbeats the master.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::CommonConfig;
use crate::framing::{read_frame, read_payload, write_frame, write_payload};
use crate::protocol::{Request, RetrieveResponse, StatusResponse};

pub struct StoragePeer {
    storage_dir: PathBuf,
    node_id: String,
    host: String,
    port: u16,
    master_addr: String,
    common: CommonConfig,
}

impl StoragePeer {
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        host: impl Into<String>,
        port: u16,
        common: CommonConfig,
    ) -> Self {
        let host = host.into();
        let node_id = format!("{}:{}", host, port);
        let master_addr = format!("{}:{}", common.master_host, common.master_port);
        Self {
            storage_dir: storage_dir.into(),
            node_id,
            host,
            port,
            master_addr,
            common,
        }
    }

    pub async fn ensure_storage_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.storage_dir).await
    }

    fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        self.storage_dir.join(chunk_id)
    }

    async fn handle_store(&self, chunk_id: String, size: u64, stream: &mut TcpStream) -> anyhow::Result<()> {
        let data = match read_payload(stream, size).await {
            Ok(d) => d,
            Err(e) => {
                write_frame(stream, &StatusResponse::error(e.to_string())).await?;
                return Ok(());
            }
        };

        let path = self.chunk_path(&chunk_id);
        match tokio::fs::write(&path, &data).await {
            Ok(()) => {
                info!(chunk_id = %chunk_id, bytes = data.len(), "stored chunk");
                write_frame(
                    stream,
                    &StatusResponse::ok(format!("Chunk {} stored", chunk_id)),
                )
                .await?;
            }
            Err(e) => {
                warn!(chunk_id = %chunk_id, error = %e, "failed to store chunk");
                write_frame(stream, &StatusResponse::error(e.to_string())).await?;
            }
        }
        Ok(())
    }

    async fn handle_retrieve(&self, chunk_id: String, stream: &mut TcpStream) -> anyhow::Result<()> {
        let path = self.chunk_path(&chunk_id);
        if !path.exists() {
            write_frame(
                stream,
                &RetrieveResponse {
                    status: "error".to_string(),
                    chunk_id: None,
                    size: None,
                    message: Some(format!("Chunk {} not found", chunk_id)),
                },
            )
            .await?;
            return Ok(());
        }

        let data = tokio::fs::read(&path).await?;
        write_frame(
            stream,
            &RetrieveResponse {
                status: "success".to_string(),
                chunk_id: Some(chunk_id.clone()),
                size: Some(data.len() as u64),
                message: None,
            },
        )
        .await?;
        write_payload(stream, &data).await?;
        debug!(chunk_id = %chunk_id, bytes = data.len(), "retrieved chunk");
        Ok(())
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        let raw: serde_json::Value = match read_frame(&mut stream).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "dropping connection: framing error");
                return Ok(());
            }
        };

        match serde_json::from_value::<Request>(raw) {
            Ok(Request::Store { chunk_id, size }) => self.handle_store(chunk_id, size, &mut stream).await,
            Ok(Request::Retrieve { chunk_id }) => self.handle_retrieve(chunk_id, &mut stream).await,
            _ => {
                write_frame(&mut stream, &StatusResponse::error("Unknown command")).await?;
                Ok(())
            }
        }
    }

    /// Accept loop with a ~1s timeout so the task can observe `shutdown`
    /// promptly (spec §5). Each connection is handled on its own task, so
    /// concurrent STOREs to distinct chunk ids proceed in parallel.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(node_id = %self.node_id, "storage peer shutting down");
                return;
            }
            match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let peer = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = peer.handle_connection(stream).await {
                            warn!(%addr, error = %e, "connection error");
                        }
                    });
                }
                Ok(Err(e)) => warn!(error = %e, "accept failed"),
                Err(_elapsed) => continue,
            }
        }
    }

    /// Every `heartbeat_interval`, opens a fresh connection to the master,
    /// sends HEARTBEAT, and closes. A failed attempt is logged and retried
    /// on the next tick — it is never fatal to the peer (spec §4.2).
    pub fn spawn_heartbeat_loop(self: &Arc<Self>) {
        let peer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(peer.common.heartbeat_interval));
            loop {
                ticker.tick().await;
                if let Err(e) = peer.send_heartbeat().await {
                    warn!(error = %e, "heartbeat failed, will retry next interval");
                }
            }
        });
    }

    async fn send_heartbeat(&self) -> anyhow::Result<()> {
        let mut stream = TcpStream::connect(&self.master_addr).await?;
        let req = Request::Heartbeat {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
        };
        write_frame(&mut stream, &req).await?;
        let resp: StatusResponse = read_frame(&mut stream).await?;
        debug!(status = %resp.status, "heartbeat acknowledged");
        Ok(())
    }
}

/// Path helper shared with tests: whether a chunk file exists on disk.
pub fn chunk_exists(storage_dir: &Path, chunk_id: &str) -> bool {
    storage_dir.join(chunk_id).exists()
}
