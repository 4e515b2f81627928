//! MiniKV - Error Types
//! Every failure the storage core can report to its caller.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, MiniKvError>;

/// Errors returned by the MiniKV storage engine.
///
/// A lookup miss is not an error: reads return `Ok(None)`.
#[derive(Error, Debug)]
pub enum MiniKvError {
    /// I/O errors from file operations (WAL, SSTable, snapshot copies).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A key or value does not fit in the 2-byte length prefix.
    #[error("{field} length {len} exceeds the maximum of {max} bytes")]
    OversizeEntry {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// On-disk data disagrees with the in-memory index.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Snapshot manifest encoding/decoding failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The WAL (or the engine owning it) has already been closed.
    #[error("storage engine is closed")]
    Closed,

    /// A previous operation panicked while holding the engine lock.
    #[error("engine lock poisoned by a panicked operation")]
    LockPoisoned,
}

impl From<bincode::Error> for MiniKvError {
    fn from(err: bincode::Error) -> Self {
        MiniKvError::Serialization(err.to_string())
    }
}
