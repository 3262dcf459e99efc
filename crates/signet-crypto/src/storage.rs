//! The storage contract (§6): a minimal key/value interface a host
//! implements over whatever persistence layer it has. This crate ships only
//! an in-memory reference implementation; a real deployment is expected to
//! back this with its own encrypted-at-rest store.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::error::StorageError;

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    /// Return all keys with the given prefix, sorted.
    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
    fn close(&self) -> Result<(), StorageError>;
}

/// In-memory reference implementation, keyed with a `BTreeMap` so `scan`
/// can return a deterministic, lexicographically sorted prefix range.
#[derive(Default)]
pub struct MemoryKvStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.data.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryKvStore::new();
        store.put("a", b"1").unwrap();
        assert_eq!(store.get("a").unwrap(), Some(b"1".to_vec()));
        store.delete("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn scan_returns_sorted_prefix_matches() {
        let store = MemoryKvStore::new();
        store.put("session/bob", b"1").unwrap();
        store.put("session/alice", b"2").unwrap();
        store.put("contact/bob", b"3").unwrap();
        let mut keys = store.scan("session/").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session/alice".to_string(), "session/bob".to_string()]);
    }
}
