//! MiniKV - Core Type Definitions

use crate::error::{MiniKvError, Result};

/// Key type for the storage engine.
/// Using Vec<u8> allows arbitrary binary keys.
pub type Key = Vec<u8>;

/// Value type for the storage engine.
pub type Value = Vec<u8>;

/// Largest key or value the on-disk formats can describe.
/// Both the WAL and SSTables store lengths as a little-endian `u16`.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// Reject a key or value that would overflow its 2-byte length prefix.
pub fn check_field_len(field: &'static str, bytes: &[u8]) -> Result<()> {
    if bytes.len() > MAX_FIELD_LEN {
        return Err(MiniKvError::OversizeEntry {
            field,
            len: bytes.len(),
            max: MAX_FIELD_LEN,
        });
    }
    Ok(())
}
