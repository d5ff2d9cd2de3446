//! The control plane (spec §4.3): peer membership, placement, and the
//! filename/chunk metadata tables. Two independently-locked pieces of
//! shared state, per spec §5 — `nodes` under `nodes_lock` and
//! `(file_chunks, chunk_locations)` together under `metadata_lock` — are
//! never held at the same time.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::CommonConfig;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    DownloadResponse, ListFilesResponse, Location, Request, StatusResponse, UploadResponse,
};

#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub last_heartbeat: u64,
}

/// Filename/chunk tables, guarded together by `metadata_lock`.
#[derive(Debug, Default)]
struct Metadata {
    /// filename -> ordered chunk ids, as accepted at UPLOAD time.
    file_chunks: HashMap<String, Vec<String>>,
    /// chunk_id -> confirmed storage locations.
    chunk_locations: HashMap<String, HashSet<Location>>,
}

#[derive(Debug)]
pub struct Master {
    nodes: RwLock<HashMap<String, PeerRecord>>,
    metadata: RwLock<Metadata>,
    common: CommonConfig,
}

impl Master {
    pub fn new(common: CommonConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            metadata: RwLock::new(Metadata::default()),
            common,
        }
    }

    async fn alive_peers(&self) -> Vec<PeerRecord> {
        let now = crate::util::now_unix();
        let nodes = self.nodes.read().await;
        nodes
            .values()
            .filter(|p| now.saturating_sub(p.last_heartbeat) < self.common.failure_timeout)
            .cloned()
            .collect()
    }

    pub async fn handle_heartbeat(&self, node_id: String, host: String, port: u16) -> StatusResponse {
        let now = crate::util::now_unix();
        let mut nodes = self.nodes.write().await;
        nodes.insert(
            node_id.clone(),
            PeerRecord {
                node_id,
                host,
                port,
                last_heartbeat: now,
            },
        );
        StatusResponse::ok("Heartbeat received")
    }

    pub async fn handle_upload(&self, filename: String, chunk_ids: Vec<String>) -> UploadResponse {
        let alive = self.alive_peers().await;
        let replication_factor = self.common.replication_factor;

        if alive.len() < replication_factor {
            return UploadResponse {
                status: "error".to_string(),
                chunk_assignments: None,
                message: Some(format!(
                    "Not enough storage peers. Need {}, have {}",
                    replication_factor,
                    alive.len()
                )),
            };
        }

        let mut rng = rand::thread_rng();
        let mut chunk_assignments: HashMap<String, Vec<Location>> = HashMap::new();
        for chunk_id in &chunk_ids {
            let selected: Vec<Location> = alive
                .choose_multiple(&mut rng, replication_factor)
                .map(|p| (p.host.clone(), p.port))
                .collect();
            chunk_assignments.insert(chunk_id.clone(), selected);
        }

        {
            let mut metadata = self.metadata.write().await;
            metadata.file_chunks.insert(filename.clone(), chunk_ids.clone());
        }

        info!(filename = %filename, chunks = chunk_ids.len(), "upload accepted");
        UploadResponse {
            status: "success".to_string(),
            chunk_assignments: Some(chunk_assignments),
            message: None,
        }
    }

    pub async fn handle_download(&self, filename: String) -> DownloadResponse {
        let chunk_ids = {
            let metadata = self.metadata.read().await;
            match metadata.file_chunks.get(&filename) {
                Some(ids) => ids.clone(),
                None => {
                    return DownloadResponse {
                        status: "error".to_string(),
                        chunk_ids: None,
                        chunk_locations: None,
                        message: Some(format!("File {} not found", filename)),
                    }
                }
            }
        };

        let alive_keys: HashSet<String> = self
            .alive_peers()
            .await
            .into_iter()
            .map(|p| format!("{}:{}", p.host, p.port))
            .collect();

        let mut chunk_locations: HashMap<String, Vec<Location>> = HashMap::new();
        {
            let metadata = self.metadata.read().await;
            for chunk_id in &chunk_ids {
                let locations = metadata
                    .chunk_locations
                    .get(chunk_id)
                    .cloned()
                    .unwrap_or_default();
                let alive_locations: Vec<Location> = locations
                    .into_iter()
                    .filter(|(host, port)| alive_keys.contains(&format!("{}:{}", host, port)))
                    .collect();
                chunk_locations.insert(chunk_id.clone(), alive_locations);
            }
        }

        DownloadResponse {
            status: "success".to_string(),
            chunk_ids: Some(chunk_ids),
            chunk_locations: Some(chunk_locations),
            message: None,
        }
    }

    pub async fn handle_report_chunk(
        &self,
        chunk_id: String,
        locations: Vec<Location>,
    ) -> StatusResponse {
        let mut metadata = self.metadata.write().await;
        metadata
            .chunk_locations
            .insert(chunk_id.clone(), locations.into_iter().collect());
        debug!(chunk_id = %chunk_id, "recorded chunk locations");
        StatusResponse::ok("Chunk location recorded")
    }

    pub async fn handle_list_files(&self) -> ListFilesResponse {
        let metadata = self.metadata.read().await;
        ListFilesResponse {
            status: "success".to_string(),
            files: Some(metadata.file_chunks.keys().cloned().collect()),
        }
    }

    /// Wakes every 5 seconds (spec §4.3): logs and prunes peers whose
    /// heartbeat is stale from every chunk's location list.
    pub fn spawn_failure_detector(self: &Arc<Self>) {
        let master = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                master.run_failure_detector_tick().await;
            }
        });
    }

    async fn run_failure_detector_tick(&self) {
        let now = crate::util::now_unix();
        let failed: Vec<(String, String, u16)> = {
            let nodes = self.nodes.read().await;
            nodes
                .values()
                .filter(|p| now.saturating_sub(p.last_heartbeat) >= self.common.failure_timeout)
                .map(|p| (p.node_id.clone(), p.host.clone(), p.port))
                .collect()
        };

        if failed.is_empty() {
            return;
        }

        for (node_id, _, _) in &failed {
            warn!(node_id = %node_id, "peer failure detected");
        }

        let mut metadata = self.metadata.write().await;
        for (_, host, port) in &failed {
            for locations in metadata.chunk_locations.values_mut() {
                locations.remove(&(host.clone(), *port));
            }
        }
    }

    /// Wakes every 30 seconds (spec §4.3): logs chunks below the target
    /// replication factor. Detection only — no repair is attempted.
    pub fn spawn_replication_monitor(self: &Arc<Self>) {
        let master = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                master.run_replication_monitor_tick().await;
            }
        });
    }

    async fn run_replication_monitor_tick(&self) {
        let metadata = self.metadata.read().await;
        for (chunk_id, locations) in metadata.chunk_locations.iter() {
            if locations.len() < self.common.replication_factor {
                warn!(
                    chunk_id = %chunk_id,
                    have = locations.len(),
                    want = self.common.replication_factor,
                    "chunk under-replicated"
                );
            }
        }
    }

    /// Accept loop with a ~1s timeout so the task can observe `shutdown`
    /// promptly (spec §5).
    pub async fn serve(self: Arc<Self>, listener: TcpListener, shutdown: Arc<AtomicBool>) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("master shutting down");
                return;
            }
            match tokio::time::timeout(Duration::from_secs(1), listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let master = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = master.handle_connection(stream).await {
                            warn!(%addr, error = %e, "connection error");
                        }
                    });
                }
                Ok(Err(e)) => error!(error = %e, "accept failed"),
                Err(_elapsed) => continue,
            }
        }
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
            Ok(Request::Heartbeat { node_id, host, port }) => {
                let resp = self.handle_heartbeat(node_id, host, port).await;
                write_frame(&mut stream, &resp).await?;
            }
            Ok(Request::Upload { filename, chunk_ids }) => {
                let resp = self.handle_upload(filename, chunk_ids).await;
                write_frame(&mut stream, &resp).await?;
            }
            Ok(Request::Download { filename }) => {
                let resp = self.handle_download(filename).await;
                write_frame(&mut stream, &resp).await?;
            }
            Ok(Request::ListFiles) => {
                let resp = self.handle_list_files().await;
                write_frame(&mut stream, &resp).await?;
            }
            Ok(Request::ReportChunk { chunk_id, locations }) => {
                let resp = self.handle_report_chunk(chunk_id, locations).await;
                write_frame(&mut stream, &resp).await?;
            }
            Ok(Request::Store { .. }) | Ok(Request::Retrieve { .. }) => {
                // Storage-peer commands sent to the master: not ours to serve.
                write_frame(&mut stream, &StatusResponse::error("Unknown command")).await?;
            }
            Err(_) => {
                write_frame(&mut stream, &StatusResponse::error("Unknown command")).await?;
            }
        }

        Ok(())
    }
}
