//! MiniKV - Engine Metrics
//! Atomic counters describing what the engine has done since it was opened.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Operation counters for a [`MiniKv`](super::MiniKv) instance.
///
/// Counters use `Ordering::Relaxed`; they are for observation only and do
/// not synchronize anything.
#[derive(Debug)]
pub struct EngineMetrics {
    pub puts: AtomicU64,
    pub gets: AtomicU64,
    /// Lookups that found nothing in the MemTable or any SSTable.
    pub misses: AtomicU64,
    pub deletes: AtomicU64,
    /// MemTable -> SSTable flushes that wrote a table.
    pub flushes: AtomicU64,
    pub snapshots: AtomicU64,
    /// Key + value bytes accepted by `put`.
    pub bytes_written: AtomicU64,
    /// Value bytes returned by `get`.
    pub bytes_read: AtomicU64,
    /// WAL entries applied to the MemTable during recovery.
    pub wal_entries_replayed: AtomicU64,
    opened_at: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            puts: AtomicU64::new(0),
            gets: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            wal_entries_replayed: AtomicU64::new(0),
            opened_at: Instant::now(),
        }
    }

    pub fn record_put(&self, key_size: usize, value_size: usize) {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add((key_size + value_size) as u64, Ordering::Relaxed);
    }

    pub fn record_get(&self, value_size: Option<usize>) {
        self.gets.fetch_add(1, Ordering::Relaxed);
        match value_size {
            Some(size) => {
                self.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replay(&self, entries: usize) {
        self.wal_entries_replayed
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> f64 {
        self.opened_at.elapsed().as_secs_f64()
    }

    /// puts + gets + deletes
    pub fn total_ops(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
            + self.gets.load(Ordering::Relaxed)
            + self.deletes.load(Ordering::Relaxed)
    }

    /// Human-readable summary, as printed by the shell's `stats` command.
    pub fn report(&self) -> String {
        format!(
            "puts:      {}\n\
             gets:      {} ({} misses)\n\
             deletes:   {}\n\
             flushes:   {}\n\
             snapshots: {}\n\
             written:   {} bytes\n\
             read:      {} bytes\n\
             replayed:  {} WAL entries\n\
             uptime:    {:.2}s",
            self.puts.load(Ordering::Relaxed),
            self.gets.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.deletes.load(Ordering::Relaxed),
            self.flushes.load(Ordering::Relaxed),
            self.snapshots.load(Ordering::Relaxed),
            self.bytes_written.load(Ordering::Relaxed),
            self.bytes_read.load(Ordering::Relaxed),
            self.wal_entries_replayed.load(Ordering::Relaxed),
            self.uptime_secs(),
        )
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
