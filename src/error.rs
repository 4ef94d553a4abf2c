use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlEngineError {
    #[error("store failure on batch {batch_index} ({completed_batches} batches already applied): {detail}")]
    StoreFailure {
        batch_index: usize,
        completed_batches: usize,
        detail: String,
    },

    #[error("invalid batch size {0}: must be at least 1")]
    InvalidBatchSize(usize),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Raised by `ActivityStore` implementations. The coordinator wraps these
/// with batch context before they reach the caller.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct StoreError(pub String);

pub type Result<T> = std::result::Result<T, GlEngineError>;
