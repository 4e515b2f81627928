//! MiniKV - Engine Configuration
//! Tunable parameters for the storage engine.

use std::path::PathBuf;

use crate::error::{MiniKvError, Result};

/// Configuration for the MiniKV storage engine.
///
/// Exactly one engine may operate on a given `data_dir` at a time.
/// This is not checked; two engines sharing a directory corrupt each other.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `wal.log`, the `sstable_<N>.sst` files and `snapshots/`.
    pub data_dir: PathBuf,

    /// MemTable size in bytes (sum of key + value lengths) above which a
    /// `put` flushes to a new SSTable.
    pub memtable_max_size: usize,

    /// Whether to sync WAL appends to stable storage before returning.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./minikv_data"),
            memtable_max_size: 1024 * 1024, // 1 MiB
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the MemTable flush threshold.
    pub fn with_memtable_max_size(mut self, size: usize) -> Self {
        self.memtable_max_size = size;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }

    /// Check the settings before the engine touches the filesystem.
    pub fn validate(&self) -> Result<()> {
        if self.memtable_max_size == 0 {
            return Err(MiniKvError::Config(
                "memtable_max_size must be greater than zero".to_string(),
            ));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(MiniKvError::Config("data_dir must not be empty".to_string()));
        }
        Ok(())
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}
