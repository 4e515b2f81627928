//! MiniKV - Write-Ahead Log (WAL)
//! Provides durability by logging every mutation to disk
//! before it is applied to the in-memory MemTable.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::error::{MiniKvError, Result};
use crate::types::{check_field_len, Key, Value};

/// Operation type for WAL entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpType {
    Put = 0x01,
    Delete = 0x02,
}

impl TryFrom<u8> for OpType {
    type Error = u8;

    fn try_from(byte: u8) -> std::result::Result<Self, u8> {
        match byte {
            0x01 => Ok(OpType::Put),
            0x02 => Ok(OpType::Delete),
            other => Err(other),
        }
    }
}

/// One durable mutation record. `value` is empty for deletes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub op: OpType,
    pub key: Key,
    pub value: Value,
}

impl LogEntry {
    pub fn put(key: Key, value: Value) -> Self {
        Self {
            op: OpType::Put,
            key,
            value,
        }
    }

    pub fn delete(key: Key) -> Self {
        Self {
            op: OpType::Delete,
            key,
            value: Vec::new(),
        }
    }
}

/// Write-Ahead Log for crash recovery and durability.
///
/// ## Binary Format (per entry)
/// ```text
/// [op_type: 1 byte][key_len: u16 LE][key][val_len: u16 LE, PUT only][value, PUT only]
/// ```
///
/// There is no checksum. A record whose declared lengths run past the end of
/// the file is treated as a torn write and dropped during [`read_all`](Self::read_all).
pub struct WriteAheadLog {
    path: PathBuf,
    /// `None` once the log has been closed.
    file: Option<File>,
    sync: bool,
}

impl WriteAheadLog {
    /// Open or create a WAL file at the specified path.
    /// With `sync` set, every append is synced to stable storage before returning.
    pub fn open(path: impl Into<PathBuf>, sync: bool) -> Result<Self> {
        let path = path.into();
        let file = Self::open_append(&path)?;
        Ok(Self {
            path,
            file: Some(file),
            sync,
        })
    }

    fn open_append(path: &Path) -> Result<File> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(file)
    }

    /// Returns the path to the WAL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Encode a PUT entry into the binary WAL format.
    fn encode_put(key: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(5 + key.len() + value.len());
        buf.put_u8(OpType::Put as u8);
        buf.put_u16_le(key.len() as u16);
        buf.put_slice(key);
        buf.put_u16_le(value.len() as u16);
        buf.put_slice(value);
        buf
    }

    /// Encode a DELETE entry. Deletes carry no value length field.
    fn encode_delete(key: &[u8]) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(3 + key.len());
        buf.put_u8(OpType::Delete as u8);
        buf.put_u16_le(key.len() as u16);
        buf.put_slice(key);
        buf
    }

    /// Append a PUT operation to the WAL and flush it to disk.
    pub fn append_put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        check_field_len("key", key)?;
        check_field_len("value", value)?;
        let encoded = Self::encode_put(key, value);
        self.append(&encoded)
    }

    /// Append a DELETE operation to the WAL and flush it to disk.
    pub fn append_delete(&mut self, key: &[u8]) -> Result<()> {
        check_field_len("key", key)?;
        let encoded = Self::encode_delete(key);
        self.append(&encoded)
    }

    fn append(&mut self, record: &[u8]) -> Result<()> {
        let sync = self.sync;
        let file = self.file.as_mut().ok_or(MiniKvError::Closed)?;
        let start = file.metadata()?.len();

        let written = file
            .write_all(record)
            .and_then(|_| file.flush())
            .and_then(|_| if sync { file.sync_data() } else { Ok(()) });

        if let Err(err) = written {
            // Cut off whatever part of the record made it out so the log
            // still ends on a record boundary.
            if let Err(rollback) = file.set_len(start) {
                log::warn!(
                    "WAL {:?}: failed to roll back partial append: {}",
                    self.path,
                    rollback
                );
            }
            return Err(err.into());
        }
        Ok(())
    }

    /// Decode every complete record from the start of the log.
    /// A missing or empty file yields no entries.
    pub fn read_all(&self) -> Result<Vec<LogEntry>> {
        Self::read_from(&self.path)
    }

    /// Decode every complete record in the WAL file at `path`.
    pub fn read_from(path: &Path) -> Result<Vec<LogEntry>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let (entries, valid_len) = Self::decode_all(&data);
        if valid_len < data.len() {
            log::warn!(
                "WAL {:?}: discarding {} unreadable trailing bytes after {} records",
                path,
                data.len() - valid_len,
                entries.len()
            );
        }
        Ok(entries)
    }

    /// Like [`read_all`](Self::read_all), but also cuts a torn tail off the
    /// file so that new appends follow the last complete record.
    pub fn recover(&mut self) -> Result<Vec<LogEntry>> {
        let file = self.file.as_mut().ok_or(MiniKvError::Closed)?;
        let data = fs::read(&self.path)?;
        let (entries, valid_len) = Self::decode_all(&data);

        if valid_len < data.len() {
            log::warn!(
                "WAL {:?}: truncating {} torn bytes after {} records",
                self.path,
                data.len() - valid_len,
                entries.len()
            );
            file.set_len(valid_len as u64)?;
            file.sync_all()?;
        }
        Ok(entries)
    }

    /// Decode complete records, returning them with the byte length they span.
    fn decode_all(data: &[u8]) -> (Vec<LogEntry>, usize) {
        let mut buf = data;
        let mut entries = Vec::new();
        while let Some(entry) = Self::decode_entry(&mut buf) {
            entries.push(entry);
        }
        (entries, data.len() - buf.remaining())
    }

    /// Decode one record, advancing `buf` only if the record is complete.
    fn decode_entry(buf: &mut &[u8]) -> Option<LogEntry> {
        let mut cur = *buf;
        if cur.remaining() < 3 {
            return None;
        }
        let op = OpType::try_from(cur.get_u8()).ok()?;

        let key_len = cur.get_u16_le() as usize;
        if cur.remaining() < key_len {
            return None;
        }
        let key = cur.copy_to_bytes(key_len).to_vec();

        let value = match op {
            OpType::Put => {
                if cur.remaining() < 2 {
                    return None;
                }
                let val_len = cur.get_u16_le() as usize;
                if cur.remaining() < val_len {
                    return None;
                }
                cur.copy_to_bytes(val_len).to_vec()
            }
            OpType::Delete => Vec::new(),
        };

        *buf = cur;
        Some(LogEntry { op, key, value })
    }

    /// Discard all content and reopen the same path empty.
    /// Only call this after the entries have been captured in a flushed SSTable.
    pub fn truncate(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Err(MiniKvError::Closed);
        }
        let truncated = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        truncated.sync_all()?;
        self.file = Some(Self::open_append(&self.path)?);
        log::debug!("WAL {:?} truncated", self.path);
        Ok(())
    }

    /// Sync and release the file handle. Calling it again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for WriteAheadLog {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("WAL {:?}: error while closing: {}", self.path, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MAX_FIELD_LEN;

    fn wal_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("wal.log")
    }

    #[test]
    fn test_put_and_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        {
            let mut wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append_put(b"key1", b"value1").unwrap();
            wal.append_delete(b"key1").unwrap();
            wal.append_put(b"key2", b"").unwrap();
        }

        let wal = WriteAheadLog::open(&path, true).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(
            entries,
            vec![
                LogEntry::put(b"key1".to_vec(), b"value1".to_vec()),
                LogEntry::delete(b"key1".to_vec()),
                LogEntry::put(b"key2".to_vec(), Vec::new()),
            ]
        );
    }

    #[test]
    fn test_record_layout() {
        let put = WriteAheadLog::encode_put(b"ab", b"xyz");
        assert_eq!(put, vec![0x01, 2, 0, b'a', b'b', 3, 0, b'x', b'y', b'z']);

        let del = WriteAheadLog::encode_delete(b"ab");
        assert_eq!(del, vec![0x02, 2, 0, b'a', b'b']);
    }

    #[test]
    fn test_read_missing_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        assert!(WriteAheadLog::read_from(&path).unwrap().is_empty());

        let wal = WriteAheadLog::open(&path, false).unwrap();
        assert!(wal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        {
            let mut wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append_put(b"a", b"1").unwrap();
            wal.append_put(b"b", b"2").unwrap();
        }

        // Half of a PUT whose value claims 100 bytes but only has 3.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 1, 0, b'c', 100, 0, b'x', b'y', b'z'])
            .unwrap();
        drop(file);

        let entries = WriteAheadLog::read_from(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].key, b"b".to_vec());
    }

    #[test]
    fn test_recover_cuts_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        {
            let mut wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append_put(b"a", b"1").unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 9, 0, b'p']).unwrap();
        drop(file);

        let mut wal = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(wal.recover().unwrap().len(), 1);
        assert_eq!(fs::metadata(&path).unwrap().len(), 6);

        // Appends after recovery are visible to the next replay.
        wal.append_put(b"b", b"2").unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1], LogEntry::put(b"b".to_vec(), b"2".to_vec()));
    }

    #[test]
    fn test_truncated_length_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        {
            let mut wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append_delete(b"gone").unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x01, 5]).unwrap();
        drop(file);

        let entries = WriteAheadLog::read_from(&path).unwrap();
        assert_eq!(entries, vec![LogEntry::delete(b"gone".to_vec())]);
    }

    #[test]
    fn test_unknown_opcode_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        {
            let mut wal = WriteAheadLog::open(&path, true).unwrap();
            wal.append_put(b"k", b"v").unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0x7f, 1, 0, b'z']).unwrap();
        drop(file);

        assert_eq!(WriteAheadLog::read_from(&path).unwrap().len(), 1);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_append_reports_write_failure() {
        // Every write to /dev/full fails with ENOSPC.
        let path = Path::new("/dev/full");
        if !path.exists() {
            return;
        }
        let mut wal = WriteAheadLog::open(path, true).unwrap();

        assert!(matches!(
            wal.append_put(b"k", b"v"),
            Err(MiniKvError::Io(_))
        ));
        assert!(matches!(
            wal.append_delete(b"k"),
            Err(MiniKvError::Io(_))
        ));
        // The handle stays usable after a failed append.
        assert!(!wal.is_closed());
    }

    #[test]
    fn test_oversize_rejected_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        let mut wal = WriteAheadLog::open(&path, true).unwrap();

        let big = vec![0u8; MAX_FIELD_LEN + 1];
        assert!(matches!(
            wal.append_put(b"k", &big),
            Err(MiniKvError::OversizeEntry { field: "value", .. })
        ));
        assert!(matches!(
            wal.append_delete(&big),
            Err(MiniKvError::OversizeEntry { field: "key", .. })
        ));
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_truncate_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = wal_path(&dir);
        let mut wal = WriteAheadLog::open(&path, true).unwrap();
        wal.append_put(b"old", b"1").unwrap();
        wal.truncate().unwrap();
        assert!(wal.read_all().unwrap().is_empty());

        wal.append_put(b"new", b"2").unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries, vec![LogEntry::put(b"new".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = WriteAheadLog::open(wal_path(&dir), true).unwrap();
        wal.append_put(b"k", b"v").unwrap();
        wal.close().unwrap();
        wal.close().unwrap();
        assert!(wal.is_closed());
        assert!(matches!(
            wal.append_put(b"k", b"v"),
            Err(MiniKvError::Closed)
        ));
        // Content written before closing is still readable.
        assert_eq!(wal.read_all().unwrap().len(), 1);
    }
}
