//! MiniKV - MemTable (In-Memory Sorted Map)
//! Holds the most recent, not-yet-flushed state. Every entry here is also
//! recorded in the WAL.

use std::collections::BTreeMap;

use crate::types::{Key, Value};

/// In-memory sorted key-value store backed by a BTreeMap.
///
/// `size()` is always exactly the sum of `key.len() + value.len()` over the
/// live entries. It is adjusted by the delta of each mutation and never
/// recomputed.
#[derive(Debug, Default)]
pub struct MemTable {
    entries: BTreeMap<Key, Value>,
    size_bytes: usize,
}

impl MemTable {
    /// Create a new, empty MemTable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked size in bytes (keys + values).
    pub fn size(&self) -> usize {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or overwrite a key.
    pub fn insert(&mut self, key: Key, value: Value) {
        let key_len = key.len();
        let new_len = value.len();
        match self.entries.insert(key, value) {
            // Key bytes were already counted; only the value changes.
            Some(old) => self.size_bytes = self.size_bytes - old.len() + new_len,
            None => self.size_bytes += key_len + new_len,
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Remove a key, returning its value if it was present.
    pub fn remove(&mut self, key: &[u8]) -> Option<Value> {
        let (old_key, old_value) = self.entries.remove_entry(key)?;
        self.size_bytes -= old_key.len() + old_value.len();
        Some(old_value)
    }

    /// Drop every entry and reset the size counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut table = MemTable::new();
        table.insert(b"key1".to_vec(), b"value1".to_vec());
        assert_eq!(table.get(b"key1"), Some(&b"value1".to_vec()));
        assert_eq!(table.get(b"missing"), None);
    }

    #[test]
    fn test_overwrite_counts_net_delta() {
        let mut table = MemTable::new();
        table.insert(b"k".to_vec(), b"v".to_vec());
        assert_eq!(table.size(), 2);

        table.insert(b"k".to_vec(), b"vv".to_vec());
        assert_eq!(table.size(), 3);
        assert_eq!(table.len(), 1);

        table.insert(b"k".to_vec(), Vec::new());
        assert_eq!(table.size(), 1);
    }

    #[test]
    fn test_remove() {
        let mut table = MemTable::new();
        table.insert(b"abc".to_vec(), b"12345".to_vec());
        table.insert(b"z".to_vec(), b"9".to_vec());
        assert_eq!(table.size(), 10);

        assert_eq!(table.remove(b"abc"), Some(b"12345".to_vec()));
        assert_eq!(table.size(), 2);
        assert_eq!(table.remove(b"abc"), None);
        assert_eq!(table.size(), 2);
    }

    #[test]
    fn test_iter_is_sorted() {
        let mut table = MemTable::new();
        for key in ["charlie", "alpha", "bravo"] {
            table.insert(key.as_bytes().to_vec(), b"x".to_vec());
        }
        let keys: Vec<&[u8]> = table.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&b"alpha"[..], &b"bravo"[..], &b"charlie"[..]]);
    }

    #[test]
    fn test_clear() {
        let mut table = MemTable::new();
        table.insert(b"k1".to_vec(), b"v1".to_vec());
        table.insert(b"k2".to_vec(), b"v2".to_vec());
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.size(), 0);
    }
}
