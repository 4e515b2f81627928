//! MiniKV - Snapshots
//! Point-in-time copies of a data directory.
//!
//! A snapshot copies `wal.log` and every SSTable into
//! `<data_dir>/snapshots/snapshot_<N>/` and records a CRC32 for each file in
//! a bincode-encoded `SNAPSHOT_META` manifest. The snapshot directory has the
//! same layout as a data directory, so an engine opened on it sees exactly
//! the state captured. The engine holds its lock for the whole copy.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{MiniKvError, Result};

/// Subdirectory of the data directory that holds snapshots.
pub const SNAPSHOT_DIR: &str = "snapshots";

const META_FILE: &str = "SNAPSHOT_META";
const DIR_PREFIX: &str = "snapshot_";
const TMP_SUFFIX: &str = ".tmp";

/// Manifest written alongside the copied files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Snapshot number, ascending per data directory.
    pub id: u64,
    /// Creation time, Unix milliseconds.
    pub timestamp_ms: u64,
    pub path: PathBuf,
    pub files: Vec<SnapshotFile>,
    pub total_size: u64,
}

/// One copied file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// File name relative to the snapshot directory.
    pub name: String,
    pub size: u64,
    /// CRC32 of the file contents.
    pub checksum: u32,
}

/// Copy `sources` into a fresh snapshot directory under `data_dir`.
///
/// Files are staged in `snapshot_<N>.tmp` and the directory is renamed into
/// place only after the manifest is synced. On failure the staging directory
/// is removed, so a `snapshot_<N>` directory always has a complete manifest.
pub(crate) fn create(data_dir: &Path, sources: &[PathBuf]) -> Result<SnapshotMeta> {
    let root = data_dir.join(SNAPSHOT_DIR);
    fs::create_dir_all(&root)?;

    let id = next_id(&root)?;
    let dest = root.join(format!("{DIR_PREFIX}{id}"));
    let staging = root.join(format!("{DIR_PREFIX}{id}{TMP_SUFFIX}"));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir(&staging)?;

    let staged = stage(&staging, id, &dest, sources).and_then(|meta| {
        fs::rename(&staging, &dest)?;
        sync_dir(&root)?;
        Ok(meta)
    });

    if staged.is_err() {
        if let Err(err) = fs::remove_dir_all(&staging) {
            log::warn!("failed to remove staging directory {:?}: {}", staging, err);
        }
    }
    staged
}

/// Copy and checksum every source into `staging`, then write the manifest.
fn stage(staging: &Path, id: u64, dest: &Path, sources: &[PathBuf]) -> Result<SnapshotMeta> {
    let mut files = Vec::with_capacity(sources.len());
    let mut total_size = 0u64;

    for src in sources {
        let name = src
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                MiniKvError::Serialization(format!("non UTF-8 file name: {:?}", src))
            })?
            .to_string();
        let dst = staging.join(&name);

        let expected = checksum(src)?;
        let size = fs::copy(src, &dst)?;
        File::open(&dst)?.sync_all()?;

        let copied = checksum(&dst)?;
        if copied != expected {
            return Err(MiniKvError::Corruption(format!(
                "checksum mismatch copying {}: expected {:08x}, got {:08x}",
                name, expected, copied
            )));
        }

        total_size += size;
        files.push(SnapshotFile {
            name,
            size,
            checksum: copied,
        });
    }

    let meta = SnapshotMeta {
        id,
        timestamp_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64,
        path: dest.to_path_buf(),
        files,
        total_size,
    };

    let mut writer = BufWriter::new(File::create(staging.join(META_FILE))?);
    bincode::serialize_into(&mut writer, &meta)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    Ok(meta)
}

/// Persist directory entries (the rename) on platforms that allow it.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Read the manifest of the snapshot stored in `dir`.
pub fn load_meta(dir: &Path) -> Result<SnapshotMeta> {
    let reader = BufReader::new(File::open(dir.join(META_FILE))?);
    let meta = bincode::deserialize_from(reader)?;
    Ok(meta)
}

/// Re-check every file listed in the manifest of `dir` against its checksum.
pub fn verify(dir: &Path) -> Result<SnapshotMeta> {
    let meta = load_meta(dir)?;
    for file in &meta.files {
        let actual = checksum(&dir.join(&file.name))?;
        if actual != file.checksum {
            return Err(MiniKvError::Corruption(format!(
                "snapshot {}: {} has checksum {:08x}, manifest says {:08x}",
                meta.id, file.name, actual, file.checksum
            )));
        }
    }
    Ok(meta)
}

/// Next snapshot number: one past the highest existing `snapshot_<N>`.
fn next_id(root: &Path) -> Result<u64> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(1),
        Err(err) => return Err(err.into()),
    };

    let mut max = 0u64;
    for entry in entries {
        let name = entry?.file_name();
        let id = name
            .to_str()
            .and_then(|name| name.strip_prefix(DIR_PREFIX))
            .and_then(|n| n.parse::<u64>().ok());
        if let Some(id) = id {
            max = max.max(id);
        }
    }
    max.checked_add(1).ok_or_else(|| {
        MiniKvError::Corruption(format!("snapshot numbers exhausted in {:?}", root))
    })
}

fn checksum(path: &Path) -> Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("wal.log");
        let b = dir.path().join("sstable_1.sst");
        fs::write(&a, b"wal bytes").unwrap();
        fs::write(&b, b"table bytes").unwrap();

        let meta = create(dir.path(), &[a.clone(), b.clone()]).unwrap();
        assert_eq!(meta.id, 1);
        assert_eq!(meta.files.len(), 2);
        assert_eq!(meta.total_size, 9 + 11);
        assert_eq!(meta.files[0].checksum, crc32fast::hash(b"wal bytes"));
        assert_eq!(fs::read(meta.path.join("sstable_1.sst")).unwrap(), b"table bytes");

        assert_eq!(load_meta(&meta.path).unwrap(), meta);
        assert_eq!(verify(&meta.path).unwrap(), meta);
    }

    #[test]
    fn test_ids_increase() {
        let dir = tempfile::tempdir().unwrap();
        let first = create(dir.path(), &[]).unwrap();
        let second = create(dir.path(), &[]).unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(second.path.ends_with("snapshot_2"));
    }

    #[test]
    fn test_failed_copy_leaves_no_snapshot_dir() {
        let dir = tempfile::tempdir().unwrap();
        let wal = dir.path().join("wal.log");
        fs::write(&wal, b"wal bytes").unwrap();
        let missing = dir.path().join("sstable_1.sst");

        assert!(create(dir.path(), &[wal.clone(), missing]).is_err());

        let leftovers: Vec<_> = fs::read_dir(dir.path().join(SNAPSHOT_DIR))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);

        // The number is not burned by the failed attempt.
        let meta = create(dir.path(), &[wal]).unwrap();
        assert_eq!(meta.id, 1);
        assert!(meta.path.ends_with("snapshot_1"));
        assert_eq!(verify(&meta.path).unwrap(), meta);
    }

    #[test]
    fn test_verify_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wal.log");
        fs::write(&src, b"original").unwrap();

        let meta = create(dir.path(), &[src]).unwrap();
        fs::write(meta.path.join("wal.log"), b"tampered").unwrap();
        assert!(matches!(
            verify(&meta.path),
            Err(MiniKvError::Corruption(_))
        ));
    }
}
