//! MiniKV - Storage Engine
//! Ties the WAL, the MemTable and the SSTables together: write ordering,
//! flush triggering, recovery and read layering.
//!
//! ## Data directory layout
//! ```text
//! <data_dir>/wal.log             write-ahead log
//! <data_dir>/sstable_<N>.sst     one per flush, N ascending across restarts
//! <data_dir>/snapshots/          point-in-time copies (see `snapshot`)
//! ```

pub mod memtable;
pub mod metrics;
pub mod snapshot;
pub mod sstable;
pub mod wal;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::Config;
use crate::error::{MiniKvError, Result};
use crate::types::{Key, Value};

use self::memtable::MemTable;
use self::metrics::EngineMetrics;
use self::snapshot::SnapshotMeta;
use self::sstable::SSTable;
use self::wal::{LogEntry, OpType, WriteAheadLog};

/// File name of the write-ahead log inside the data directory.
pub const WAL_FILE_NAME: &str = "wal.log";

/// Everything guarded by the engine lock.
struct EngineState {
    memtable: MemTable,
    wal: WriteAheadLog,
    /// Ordered oldest -> newest by sequence number.
    sstables: Vec<SSTable>,
    /// Sequence number for the next flushed table.
    next_sequence: u64,
}

/// The MiniKV storage engine.
///
/// Every operation takes `&self` and runs to completion under one internal
/// mutex, so operations never overlap. Share an engine between threads with
/// `Arc<MiniKv>`. A `put` that crosses the flush threshold writes the new
/// SSTable before it returns; there are no background threads.
///
/// Only one engine may use a data directory at a time. This is not enforced.
pub struct MiniKv {
    state: Mutex<EngineState>,
    config: Config,
    metrics: EngineMetrics,
}

impl MiniKv {
    /// Open or create an engine in `config.data_dir` and recover its state:
    /// SSTables are loaded in sequence order, then the WAL is replayed into
    /// a fresh MemTable.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        config.ensure_dirs()?;

        let sstables = Self::load_sstables(&config.data_dir)?;
        let next_sequence = match sstables.last().and_then(SSTable::sequence) {
            Some(seq) => Self::sequence_after(seq)?,
            None => 1,
        };

        let mut wal = WriteAheadLog::open(
            config.data_dir.join(WAL_FILE_NAME),
            config.sync_writes,
        )?;
        let entries = wal.recover()?;
        let replayed = entries.len();
        let mut memtable = MemTable::new();
        Self::replay(&mut memtable, entries);

        let metrics = EngineMetrics::new();
        metrics.record_replay(replayed);

        log::info!(
            "MiniKV opened at {:?}: {} sstables, {} WAL entries replayed, {} live memtable keys",
            config.data_dir,
            sstables.len(),
            replayed,
            memtable.len()
        );

        Ok(Self {
            state: Mutex::new(EngineState {
                memtable,
                wal,
                sstables,
                next_sequence,
            }),
            config,
            metrics,
        })
    }

    /// Load every `sstable_<N>.sst` in `dir`, sorted by `N`.
    /// Directory listing order is never used to infer recency.
    fn load_sstables(dir: &Path) -> Result<Vec<SSTable>> {
        let mut found: Vec<(u64, PathBuf)> = Vec::new();

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();

            if let Some(seq) = sstable::parse_sequence(&path) {
                found.push((seq, path));
            } else if sstable::is_temp_file(&path) {
                // Left over from a flush that never reached its rename; the
                // WAL still holds those entries.
                log::warn!("removing incomplete table {:?}", path);
                fs::remove_file(&path)?;
            } else if path.file_name().map_or(true, |name| name != WAL_FILE_NAME) {
                log::debug!("ignoring unrecognised file {:?}", path);
            }
        }

        found.sort_unstable_by_key(|(seq, _)| *seq);

        let mut tables = Vec::with_capacity(found.len());
        for (_, path) in found {
            let table = SSTable::open(path)?;
            if table.is_valid() {
                tables.push(table);
            }
        }
        Ok(tables)
    }

    /// The sequence number following `seq`. Overflow means the directory
    /// holds a table numbered `u64::MAX` and no later table can be named.
    fn sequence_after(seq: u64) -> Result<u64> {
        seq.checked_add(1).ok_or_else(|| {
            MiniKvError::Corruption(format!(
                "sstable sequence {} cannot be followed by a newer table",
                seq
            ))
        })
    }

    /// Apply WAL entries in file order.
    fn replay(memtable: &mut MemTable, entries: Vec<LogEntry>) {
        for entry in entries {
            match entry.op {
                OpType::Put => memtable.insert(entry.key, entry.value),
                OpType::Delete => {
                    memtable.remove(&entry.key);
                }
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>> {
        self.state.lock().map_err(|_| MiniKvError::LockPoisoned)
    }

    /// Lock for read-only statistics, which stay meaningful after a panic.
    fn lock_stats(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite a key.
    ///
    /// The write path: WAL (disk) -> MemTable (memory). If the WAL append
    /// fails, including for a key or value over 65535 bytes, the MemTable is
    /// untouched and the error is returned.
    ///
    /// When the MemTable grows past `memtable_max_size` it is flushed before
    /// this call returns. A failed flush is logged, not returned: the write is
    /// already durable in the WAL and the flush is retried on the next `put`.
    pub fn put(&self, key: Key, value: Value) -> Result<()> {
        let mut state = self.lock()?;

        state.wal.append_put(&key, &value)?;
        self.metrics.record_put(key.len(), value.len());
        state.memtable.insert(key, value);

        if state.memtable.size() > self.config.memtable_max_size {
            if let Err(err) = self.flush_locked(&mut state) {
                log::error!("flush after put failed, will retry: {}", err);
            }
        }
        Ok(())
    }

    /// Look up a key: the MemTable first, then SSTables newest to oldest.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        let state = self.lock()?;

        let found = match state.memtable.get(key) {
            Some(value) => Some(value.clone()),
            None => {
                let mut hit = None;
                for table in state.sstables.iter().rev() {
                    if let Some(value) = table.get(key)? {
                        hit = Some(value);
                        break;
                    }
                }
                hit
            }
        };

        self.metrics.record_get(found.as_ref().map(Vec::len));
        Ok(found)
    }

    /// Delete a key.
    ///
    /// A DELETE record goes to the WAL, then the key is dropped from the
    /// MemTable. No tombstone is ever written to an SSTable, so a key whose
    /// value has already been flushed stays readable from that table after
    /// the delete. Only compaction could remove it, and compaction is not
    /// implemented.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut state = self.lock()?;

        state.wal.append_delete(key)?;
        self.metrics.record_delete();
        state.memtable.remove(key);
        Ok(())
    }

    /// Write the MemTable to a new SSTable and truncate the WAL.
    /// Does nothing when the MemTable is empty.
    pub fn flush(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut EngineState) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }
        if state.wal.is_closed() {
            return Err(MiniKvError::Closed);
        }

        let seq = state.next_sequence;
        let following = Self::sequence_after(seq)?;
        let path = self.config.data_dir.join(sstable::file_name(seq));
        let mut table = SSTable::open(path)?;
        table.write(state.memtable.iter())?;

        // The table is on disk; the number is spent even if truncation fails.
        state.next_sequence = following;
        let entries = state.memtable.len();
        state.sstables.push(table);
        state.memtable.clear();
        state.wal.truncate()?;

        self.metrics.record_flush();
        log::info!("flushed {} entries to {}", entries, sstable::file_name(seq));
        Ok(())
    }

    /// Copy the WAL and every SSTable into `<data_dir>/snapshots/snapshot_<N>/`.
    ///
    /// The copy is taken under the engine lock, so it reflects exactly the
    /// state visible at the moment of the call. The snapshot directory can be
    /// opened as a data directory of its own.
    pub fn snapshot(&self) -> Result<SnapshotMeta> {
        let state = self.lock()?;

        let mut sources = Vec::with_capacity(state.sstables.len() + 1);
        sources.push(state.wal.path().to_path_buf());
        sources.extend(state.sstables.iter().map(|t| t.path().to_path_buf()));

        let meta = snapshot::create(&self.config.data_dir, &sources)?;
        self.metrics.record_snapshot();
        log::info!(
            "snapshot {} written to {:?} ({} files, {} bytes)",
            meta.id,
            meta.path,
            meta.files.len(),
            meta.total_size
        );
        Ok(meta)
    }

    /// Extension point for merging SSTables.
    ///
    /// A compaction must merge all SSTables and the MemTable into a minimal
    /// set of sorted tables where the newest write per key wins and deleted
    /// keys are dropped, then remove the superseded files. Each table's
    /// records come from [`SSTable::entries`], oldest table first. Until one
    /// exists this leaves every file as it is.
    pub fn compact(&self) -> Result<()> {
        let state = self.lock()?;
        log::debug!(
            "compaction requested over {} sstables; no compaction strategy is configured",
            state.sstables.len()
        );
        Ok(())
    }

    /// Close the WAL. Reads keep working; writes fail with
    /// [`MiniKvError::Closed`]. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        state.wal.close()
    }

    /// Number of live keys in the MemTable.
    pub fn len(&self) -> usize {
        self.lock_stats().memtable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_stats().memtable.is_empty()
    }

    /// Tracked MemTable size in bytes (keys + values).
    pub fn memtable_size(&self) -> usize {
        self.lock_stats().memtable.size()
    }

    pub fn sstable_count(&self) -> usize {
        self.lock_stats().sstables.len()
    }

    /// Paths of the loaded SSTables, oldest first.
    pub fn sstable_paths(&self) -> Vec<PathBuf> {
        self.lock_stats()
            .sstables
            .iter()
            .map(|t| t.path().to_path_buf())
            .collect()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }
}
