//! End-to-end scenarios from spec §8, driven over real TCP loopback
//! connections against an in-process master and storage peers.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::net::TcpListener;

use shardmesh::client::ClientOrchestrator;
use shardmesh::config::CommonConfig;
use shardmesh::framing::{read_frame, write_frame};
use shardmesh::master::Master;
use shardmesh::peer::StoragePeer;
use shardmesh::protocol::{Request, StatusResponse};

async fn spawn_master(common: CommonConfig) -> Arc<Master> {
    let listener = TcpListener::bind((common.master_host.as_str(), common.master_port))
        .await
        .unwrap();
    let master = Arc::new(Master::new(common));
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&master);
    tokio::spawn(async move { handle.serve(listener, shutdown).await });
    master
}

async fn spawn_peer(
    host: &str,
    port: u16,
    common: CommonConfig,
) -> (Arc<StoragePeer>, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let peer = Arc::new(StoragePeer::new(dir.path(), host, port, common));
    peer.ensure_storage_dir().await.unwrap();
    let listener = TcpListener::bind((host, port)).await.unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&peer);
    tokio::spawn(async move { handle.serve(listener, shutdown).await });
    (peer, dir)
}

async fn heartbeat_once(master_host: &str, master_port: u16, node_id: &str, host: &str, port: u16) {
    let mut stream = tokio::net::TcpStream::connect((master_host, master_port))
        .await
        .unwrap();
    write_frame(
        &mut stream,
        &Request::Heartbeat {
            node_id: node_id.to_string(),
            host: host.to_string(),
            port,
        },
    )
    .await
    .unwrap();
    let _resp: StatusResponse = read_frame(&mut stream).await.unwrap();
}

fn common_config(master_port: u16, replication_factor: usize) -> CommonConfig {
    CommonConfig {
        master_host: "127.0.0.1".to_string(),
        master_port,
        chunk_size: 4,
        replication_factor,
        heartbeat_interval: 1,
        failure_timeout: 3,
        log_level: "error".to_string(),
        log_output: "stdout".to_string(),
    }
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn happy_path_upload_and_download_round_trips_bytes() {
    let master_port = free_port().await;
    let common = common_config(master_port, 2);
    let _master = spawn_master(common.clone()).await;

    let peer_a_port = free_port().await;
    let peer_b_port = free_port().await;
    let peer_c_port = free_port().await;
    let (peer_a, _dir_a) = spawn_peer("127.0.0.1", peer_a_port, common.clone()).await;
    let (peer_b, _dir_b) = spawn_peer("127.0.0.1", peer_b_port, common.clone()).await;
    let (peer_c, _dir_c) = spawn_peer("127.0.0.1", peer_c_port, common.clone()).await;
    peer_a.spawn_heartbeat_loop();
    peer_b.spawn_heartbeat_loop();
    peer_c.spawn_heartbeat_loop();

    // Let at least one heartbeat land for each peer.
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let client = ClientOrchestrator::new(common);
    let outcome = client.upload_bytes("file.txt", b"HELLOWORLD").await.unwrap();
    assert_eq!(outcome.total_chunks, 3);
    assert_eq!(outcome.stored_chunks, 3);

    let data = client.download_bytes("file.txt").await.unwrap();
    assert_eq!(data, b"HELLOWORLD");

    let files = client.list_files().await.unwrap();
    assert_eq!(files, vec!["file.txt".to_string()]);
}

#[tokio::test]
async fn replica_loss_is_tolerated_after_failure_timeout() {
    let master_port = free_port().await;
    // replication_factor == peer count: every chunk lands on all three.
    let common = common_config(master_port, 3);
    let _master = spawn_master(common.clone()).await;

    let peer_a_port = free_port().await;
    let peer_b_port = free_port().await;
    let peer_c_port = free_port().await;
    let (peer_a, _dir_a) = spawn_peer("127.0.0.1", peer_a_port, common.clone()).await;
    let (peer_b, _dir_b) = spawn_peer("127.0.0.1", peer_b_port, common.clone()).await;
    let (_peer_c, _dir_c) = spawn_peer("127.0.0.1", peer_c_port, common.clone()).await;

    peer_a.spawn_heartbeat_loop();
    peer_b.spawn_heartbeat_loop();
    // Peer C heartbeats exactly once, then goes silent to simulate failure.
    heartbeat_once(
        "127.0.0.1",
        master_port,
        &format!("127.0.0.1:{}", peer_c_port),
        "127.0.0.1",
        peer_c_port,
    )
    .await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    let client = ClientOrchestrator::new(common);
    let outcome = client.upload_bytes("doc.bin", b"HELLOWORLD").await.unwrap();
    assert_eq!(outcome.stored_chunks, 3);

    // Peer C's heartbeat ages past FAILURE_TIMEOUT while A and B keep refreshing.
    tokio::time::sleep(Duration::from_millis(3200)).await;

    let data = client.download_bytes("doc.bin").await.unwrap();
    assert_eq!(data, b"HELLOWORLD");
}

#[tokio::test]
async fn upload_rejected_when_fewer_peers_than_replication_factor() {
    let master_port = free_port().await;
    let common = common_config(master_port, 2);
    let _master = spawn_master(common.clone()).await;

    let peer_port = free_port().await;
    let (peer, _dir) = spawn_peer("127.0.0.1", peer_port, common.clone()).await;
    peer.spawn_heartbeat_loop();
    tokio::time::sleep(Duration::from_millis(1200)).await;

    let client = ClientOrchestrator::new(common);
    let err = client.upload_bytes("file.txt", b"HELLOWORLD").await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("Need 2"), "unexpected message: {message}");
}

#[tokio::test]
async fn unrecoverable_chunk_fails_download_without_partial_output() {
    let master_port = free_port().await;
    // Only one replica per chunk: losing that single peer makes the
    // chunk's location set empty and the whole download must fail.
    let common = common_config(master_port, 1);
    let _master = spawn_master(common.clone()).await;

    let peer_port = free_port().await;
    let (_peer, _dir) = spawn_peer("127.0.0.1", peer_port, common.clone()).await;
    // Heartbeat exactly once so the peer is alive for UPLOAD/STORE, then
    // goes silent to simulate a failed replica rather than a live one.
    heartbeat_once(
        "127.0.0.1",
        master_port,
        &format!("127.0.0.1:{}", peer_port),
        "127.0.0.1",
        peer_port,
    )
    .await;

    let client = ClientOrchestrator::new(common.clone());
    let outcome = client.upload_bytes("lonely.bin", b"HELLOWORLD").await.unwrap();
    assert_eq!(outcome.stored_chunks, 3);

    // Wait past FAILURE_TIMEOUT so the master prunes the now-stale peer
    // from every chunk's location list.
    tokio::time::sleep(Duration::from_millis(3200)).await;

    let err = client.download_bytes("lonely.bin").await.unwrap_err();
    assert!(matches!(err, shardmesh::error::ClientError::ChunkUnrecoverable(_)));
}

#[tokio::test]
async fn download_of_unknown_file_fails_cleanly() {
    let master_port = free_port().await;
    let common = common_config(master_port, 2);
    let _master = spawn_master(common.clone()).await;

    let client = ClientOrchestrator::new(common);
    let err = client.download_bytes("no_such_file").await.unwrap_err();
    assert!(err.to_string().contains("no_such_file not found"));
}
