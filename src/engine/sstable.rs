//! MiniKV - SSTable (Sorted String Table)
//! Immutable on-disk table produced by flushing the MemTable, plus the
//! in-memory index used to find records in it.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut};

use crate::error::{MiniKvError, Result};
use crate::types::{check_field_len, Key, Value};

const FILE_PREFIX: &str = "sstable_";
const FILE_SUFFIX: &str = ".sst";
const TMP_SUFFIX: &str = ".tmp";

/// File name for the table with sequence number `seq`, e.g. `sstable_7.sst`.
pub fn file_name(seq: u64) -> String {
    format!("{FILE_PREFIX}{seq}{FILE_SUFFIX}")
}

/// Extract the sequence number from an `sstable_<N>.sst` path.
/// Returns `None` for anything else, including in-progress `.tmp` files.
/// Only the canonical spelling from [`file_name`] is accepted, so
/// `sstable_01.sst` or `sstable_+1.sst` never alias `sstable_1.sst`.
pub fn parse_sequence(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let seq: u64 = name
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()?;
    (file_name(seq) == name).then_some(seq)
}

/// Whether `path` is a table left half-written by an interrupted flush.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| {
            name.starts_with(FILE_PREFIX) && name.ends_with(TMP_SUFFIX)
        })
}

/// Location of one record inside the table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Key,
    /// Byte offset of the record's `key_len` field.
    pub offset: u64,
    /// Full encoded record length, both length prefixes included.
    pub len: u64,
}

/// Sorted String Table - immutable on-disk storage.
///
/// ## Binary Format (per record, ascending key order)
/// ```text
/// [key_len: u16 LE][key][val_len: u16 LE][value]
/// ```
///
/// There are no tombstones, no header and no footer. The index is rebuilt by
/// scanning the file when a table is opened.
#[derive(Debug)]
pub struct SSTable {
    path: PathBuf,
    /// Sorted ascending by key, one entry per record.
    index: Vec<IndexEntry>,
    valid: bool,
}

impl SSTable {
    /// Open the table at `path`, building its index from the file.
    ///
    /// A missing file yields an empty, not-yet-valid table that can be
    /// [`write`](Self::write)n. A record whose lengths run past the end of the
    /// file ends the scan; the records before it stay indexed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let mut table = Self {
            path: path.into(),
            index: Vec::new(),
            valid: false,
        };

        match File::open(&table.path) {
            Ok(file) => {
                table.index = Self::build_index(&table.path, file)?;
                table.valid = true;
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(table)
    }

    fn build_index(path: &Path, file: File) -> Result<Vec<IndexEntry>> {
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut index = Vec::new();
        let mut offset = 0u64;
        let mut len_buf = [0u8; 2];

        while offset < file_len {
            if file_len - offset < 2 {
                break;
            }
            reader.read_exact(&mut len_buf)?;
            let key_len = u16::from_le_bytes(len_buf) as u64;
            if file_len - offset < 4 + key_len {
                break;
            }
            let mut key = vec![0u8; key_len as usize];
            reader.read_exact(&mut key)?;
            reader.read_exact(&mut len_buf)?;
            let val_len = u16::from_le_bytes(len_buf) as u64;

            let len = 4 + key_len + val_len;
            if file_len - offset < len {
                break;
            }
            // Values are not needed for the index.
            reader.seek_relative(val_len as i64)?;

            index.push(IndexEntry { key, offset, len });
            offset += len;
        }

        if offset < file_len {
            log::warn!(
                "SSTable {:?}: ignoring {} trailing bytes after {} records",
                path,
                file_len - offset,
                index.len()
            );
        }
        Ok(index)
    }

    /// Serialize `entries` into the table file and index them in the same pass.
    ///
    /// The caller must supply keys in strictly ascending order without
    /// duplicates; this method does not sort. Data is written to a temporary
    /// file, synced and renamed over `path`. On any failure the table is left
    /// invalid and its index empty.
    pub fn write<'a, I>(&mut self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        self.valid = false;
        self.index.clear();

        match self.write_file(entries) {
            Ok(index) => {
                self.index = index;
                self.valid = true;
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(self.temp_path());
                Err(err)
            }
        }
    }

    fn write_file<'a, I>(&self, entries: I) -> Result<Vec<IndexEntry>>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        let tmp_path = self.temp_path();
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        let mut index: Vec<IndexEntry> = Vec::new();
        let mut offset = 0u64;
        let mut record: Vec<u8> = Vec::new();

        for (key, value) in entries {
            check_field_len("key", key)?;
            check_field_len("value", value)?;
            debug_assert!(
                index.last().map_or(true, |prev| prev.key.as_slice() < key),
                "SSTable entries must be strictly ascending"
            );

            record.clear();
            record.put_u16_le(key.len() as u16);
            record.put_slice(key);
            record.put_u16_le(value.len() as u16);
            record.put_slice(value);
            writer.write_all(&record)?;

            let len = record.len() as u64;
            index.push(IndexEntry {
                key: key.to_vec(),
                offset,
                len,
            });
            offset += len;
        }

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(index)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(TMP_SUFFIX);
        PathBuf::from(name)
    }

    /// Point lookup. Binary-searches the index, then reads the one record
    /// from disk. The file is reopened on every call.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>> {
        if !self.valid {
            return Ok(None);
        }
        let entry = match self.find(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let record = self.read_record(entry)?;
        let (stored_key, value) = Self::decode_record(&record).ok_or_else(|| {
            MiniKvError::Corruption(format!(
                "{:?}: malformed record at offset {}",
                self.path, entry.offset
            ))
        })?;

        if stored_key != key {
            return Err(MiniKvError::Corruption(format!(
                "{:?}: index points at a different key at offset {}",
                self.path, entry.offset
            )));
        }
        Ok(Some(value.to_vec()))
    }

    fn find(&self, key: &[u8]) -> Option<&IndexEntry> {
        self.index
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
            .ok()
            .map(|pos| &self.index[pos])
    }

    fn read_record(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.offset))?;
        let mut record = vec![0u8; entry.len as usize];
        file.read_exact(&mut record)?;
        Ok(record)
    }

    /// Split an encoded record into `(key, value)`.
    fn decode_record(mut buf: &[u8]) -> Option<(&[u8], &[u8])> {
        if buf.remaining() < 2 {
            return None;
        }
        let key_len = buf.get_u16_le() as usize;
        if buf.remaining() < key_len + 2 {
            return None;
        }
        let (key, mut rest) = buf.split_at(key_len);
        let val_len = rest.get_u16_le() as usize;
        if rest.remaining() < val_len {
            return None;
        }
        Some((key, &rest[..val_len]))
    }

    /// Read every record in key order.
    ///
    /// This is the input a compaction merges; see [`MiniKv::compact`].
    ///
    /// [`MiniKv::compact`]: crate::engine::MiniKv::compact
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        if !self.valid {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path)?;
        let mut out = Vec::with_capacity(self.index.len());
        for entry in &self.index {
            let start = entry.offset as usize;
            let end = start + entry.len as usize;
            let (key, value) = data
                .get(start..end)
                .and_then(Self::decode_record)
                .ok_or_else(|| {
                    MiniKvError::Corruption(format!(
                        "{:?}: record at offset {} is out of bounds",
                        self.path, entry.offset
                    ))
                })?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number embedded in the file name, if it follows `sstable_<N>.sst`.
    pub fn sequence(&self) -> Option<u64> {
        parse_sequence(&self.path)
    }

    /// True once the file has been fully scanned or successfully written.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn index(&self) -> &[IndexEntry] {
        &self.index
    }
}
