//! Client orchestrator (spec §4.4): partitions a file into chunks,
//! drives replication across assigned peers, and reassembles files on
//! download. Chunks are uploaded and downloaded sequentially — a client
//! operation is single-tasked, per spec §5.

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::config::CommonConfig;
use crate::error::ClientError;
use crate::framing::{read_frame, read_payload, write_frame, write_payload};
use crate::protocol::{
    DownloadResponse, ListFilesResponse, Location, Request, RetrieveResponse, StatusResponse,
    UploadResponse,
};
use crate::util::chunk_id;

/// Outcome of an upload: how many of the file's chunks landed on at
/// least one replica (spec §7, "partial-upload outcome").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub stored_chunks: usize,
    pub total_chunks: usize,
}

pub struct ClientOrchestrator {
    common: CommonConfig,
}

impl ClientOrchestrator {
    pub fn new(common: CommonConfig) -> Self {
        Self { common }
    }

    async fn connect_master(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect((self.common.master_host.as_str(), self.common.master_port)).await
    }

    /// Split `data` into fixed-size windows and id each one (spec §4.4, §3).
    pub fn partition_bytes(&self, data: &[u8]) -> Vec<(String, Vec<u8>)> {
        let size = self.common.chunk_size as usize;
        let mut chunks = Vec::new();
        let mut index = 0usize;
        for window in data.chunks(size.max(1)) {
            chunks.push((chunk_id(index, window), window.to_vec()));
            index += 1;
        }
        chunks
    }

    pub async fn upload_bytes(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<UploadOutcome, ClientError> {
        let chunks = self.partition_bytes(data);
        let chunk_ids: Vec<String> = chunks.iter().map(|(id, _)| id.clone()).collect();
        let total_chunks = chunks.len();

        let mut stream = self.connect_master().await?;
        write_frame(
            &mut stream,
            &Request::Upload {
                filename: filename.to_string(),
                chunk_ids,
            },
        )
        .await?;
        let response: UploadResponse = read_frame(&mut stream).await?;

        if response.status != "success" {
            return Err(ClientError::MasterRejected(
                response.message.unwrap_or_else(|| "upload rejected".to_string()),
            ));
        }
        let mut assignments = response.chunk_assignments.unwrap_or_default();

        let mut stored_chunks = 0;
        for (chunk_id, chunk_data) in chunks {
            let assigned = assignments.remove(&chunk_id).unwrap_or_default();
            if assigned.is_empty() {
                warn!(chunk_id = %chunk_id, "no peers assigned for chunk");
                continue;
            }

            let mut stored_locations = Vec::new();
            for (host, port) in &assigned {
                match self.store_chunk(host, *port, &chunk_id, &chunk_data).await {
                    Ok(true) => stored_locations.push((host.clone(), *port)),
                    Ok(false) => warn!(chunk_id = %chunk_id, %host, port, "peer declined chunk"),
                    Err(e) => warn!(chunk_id = %chunk_id, %host, port, error = %e, "store failed"),
                }
            }

            if stored_locations.is_empty() {
                warn!(chunk_id = %chunk_id, "chunk stored on zero peers");
                continue;
            }

            self.report_chunk(&chunk_id, &stored_locations).await?;
            stored_chunks += 1;
        }

        info!(filename, stored_chunks, total_chunks, "upload complete");
        Ok(UploadOutcome {
            stored_chunks,
            total_chunks,
        })
    }

    pub async fn upload_file(&self, path: &std::path::Path) -> Result<UploadOutcome, ClientError> {
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        self.upload_bytes(&filename, &data).await
    }

    async fn store_chunk(
        &self,
        host: &str,
        port: u16,
        chunk_id: &str,
        data: &[u8],
    ) -> Result<bool, ClientError> {
        let mut stream = TcpStream::connect((host, port)).await?;
        write_frame(
            &mut stream,
            &Request::Store {
                chunk_id: chunk_id.to_string(),
                size: data.len() as u64,
            },
        )
        .await?;
        write_payload(&mut stream, data).await?;
        let resp: StatusResponse = read_frame(&mut stream).await?;
        Ok(resp.is_success())
    }

    async fn report_chunk(
        &self,
        chunk_id: &str,
        locations: &[Location],
    ) -> Result<(), ClientError> {
        let mut stream = self.connect_master().await?;
        write_frame(
            &mut stream,
            &Request::ReportChunk {
                chunk_id: chunk_id.to_string(),
                locations: locations.to_vec(),
            },
        )
        .await?;
        let _resp: StatusResponse = read_frame(&mut stream).await?;
        Ok(())
    }

    /// Fetches every chunk, in order, from whichever listed location
    /// answers first. The whole file is assembled in memory before any
    /// output is produced — an unrecoverable chunk aborts cleanly with
    /// no partial file ever written (SPEC_FULL.md §C.1).
    pub async fn download_bytes(&self, filename: &str) -> Result<Vec<u8>, ClientError> {
        let mut stream = self.connect_master().await?;
        write_frame(
            &mut stream,
            &Request::Download {
                filename: filename.to_string(),
            },
        )
        .await?;
        let response: DownloadResponse = read_frame(&mut stream).await?;

        if response.status != "success" {
            return Err(ClientError::MasterRejected(
                response
                    .message
                    .unwrap_or_else(|| "download rejected".to_string()),
            ));
        }

        let chunk_ids = response.chunk_ids.unwrap_or_default();
        let mut chunk_locations = response.chunk_locations.unwrap_or_default();

        let mut out = Vec::new();
        for chunk_id in chunk_ids {
            let locations = chunk_locations.remove(&chunk_id).unwrap_or_default();
            let data = self.retrieve_first_success(&chunk_id, &locations).await;
            match data {
                Some(bytes) => out.extend_from_slice(&bytes),
                None => {
                    warn!(chunk_id = %chunk_id, "no location could serve chunk");
                    return Err(ClientError::ChunkUnrecoverable(chunk_id));
                }
            }
        }
        Ok(out)
    }

    pub async fn download_file(
        &self,
        filename: &str,
        output_path: &std::path::Path,
    ) -> Result<(), ClientError> {
        let data = self.download_bytes(filename).await?;
        let mut file = tokio::fs::File::create(output_path).await?;
        file.write_all(&data).await?;
        Ok(())
    }

    async fn retrieve_first_success(&self, chunk_id: &str, locations: &[Location]) -> Option<Vec<u8>> {
        for (host, port) in locations {
            match self.retrieve_chunk(host, *port, chunk_id).await {
                Ok(Some(data)) => return Some(data),
                Ok(None) => warn!(chunk_id, %host, port, "peer does not have chunk"),
                Err(e) => warn!(chunk_id, %host, port, error = %e, "retrieve failed"),
            }
        }
        None
    }

    async fn retrieve_chunk(
        &self,
        host: &str,
        port: u16,
        chunk_id: &str,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        let mut stream = TcpStream::connect((host, port)).await?;
        write_frame(
            &mut stream,
            &Request::Retrieve {
                chunk_id: chunk_id.to_string(),
            },
        )
        .await?;
        let resp: RetrieveResponse = read_frame(&mut stream).await?;
        if resp.status != "success" {
            return Ok(None);
        }
        let size = resp.size.unwrap_or(0);
        let data = read_payload(&mut stream, size).await?;
        Ok(Some(data))
    }

    pub async fn list_files(&self) -> Result<Vec<String>, ClientError> {
        let mut stream = self.connect_master().await?;
        write_frame(&mut stream, &Request::ListFiles).await?;
        let resp: ListFilesResponse = read_frame(&mut stream).await?;
        Ok(resp.files.unwrap_or_default())
    }
}
