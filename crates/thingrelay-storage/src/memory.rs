//! Volatile storage backend.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::backend::{make_key, StorageBackend};
use crate::error::Result;

/// In-memory backend keyed like the redb one.
#[derive(Default)]
pub struct MemoryBackend {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(make_key(table, key), value.to_vec());
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(&make_key(table, key)).cloned())
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(&make_key(table, key)).is_some())
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = make_key(table, prefix);
        let strip = table.len() + 1;
        Ok(self
            .entries
            .read()
            .range(table_prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&table_prefix))
            .map(|(k, v)| (k[strip..].to_string(), v.clone()))
            .collect())
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let mut entries = self.entries.write();
        for (key, value) in items {
            entries.insert(make_key(table, &key), value);
        }
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_and_scan() {
        let backend = MemoryBackend::new();
        backend
            .write_batch(
                "subs",
                vec![
                    ("g1:a".into(), b"1".to_vec()),
                    ("g1:b".into(), b"2".to_vec()),
                    ("g2:c".into(), b"3".to_vec()),
                ],
            )
            .unwrap();
        assert_eq!(backend.len(), 3);
        assert_eq!(backend.scan("subs", "g1:").unwrap().len(), 2);
        assert!(backend.delete("subs", "g1:a").unwrap());
        assert!(!backend.delete("subs", "g1:a").unwrap());
        assert_eq!(backend.read("subs", "g2:c").unwrap(), Some(b"3".to_vec()));
    }
}
