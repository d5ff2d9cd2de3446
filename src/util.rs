//! Small shared helpers: chunk-id hashing and monotonic-ish timestamps.

use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Build a chunk id per spec §3: `chunk_{index}_{first-16-hex-of-sha256}`.
pub fn chunk_id(index: usize, data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let hash_hex = hex::encode(digest);
    format!("chunk_{}_{}", index, &hash_hex[..16])
}

/// Seconds since the UNIX epoch, used as the liveness clock (spec §3).
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before UNIX epoch")
        .as_secs()
}
