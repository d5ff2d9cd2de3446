use thiserror::Error;

/// Errors from the length-prefixed frame codec (spec §4.1).
#[derive(Debug, Error)]
pub enum FramingError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("malformed JSON frame: {0}")]
    MalformedJson(#[from] serde_json::Error),
    #[error("declared payload length {declared} exceeds limit {limit}")]
    PayloadTooLarge { declared: u64, limit: u64 },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the client orchestrator.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("master rejected request: {0}")]
    MasterRejected(String),
    #[error("chunk {0} has no stored replicas")]
    ChunkUnrecoverable(String),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
