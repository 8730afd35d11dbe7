//! Redb storage backend.
//!
//! All tables share one redb table with namespaced `table:key` entries.

use std::path::Path;
use std::sync::Arc;

use redb::backends::InMemoryBackend;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::backend::{make_key, StorageBackend};
use crate::error::Result;

const UNIFIED_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("unified_storage");

/// Path value selecting a volatile database.
pub const MEMORY_PATH: &str = ":memory:";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedbBackendConfig {
    /// Database file, or `:memory:`.
    pub path: String,

    /// Create parent directories if they don't exist.
    #[serde(default = "default_create_dirs")]
    pub create_dirs: bool,
}

fn default_create_dirs() -> bool {
    true
}

impl RedbBackendConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            create_dirs: true,
        }
    }

    pub fn with_create_dirs(mut self, create_dirs: bool) -> Self {
        self.create_dirs = create_dirs;
        self
    }

    pub fn memory() -> Self {
        Self {
            path: MEMORY_PATH.to_string(),
            create_dirs: false,
        }
    }
}

/// redb-based storage backend.
pub struct RedbBackend {
    db: Arc<Database>,
    path: String,
}

impl RedbBackend {
    pub fn new(config: RedbBackendConfig) -> Result<Self> {
        let db = if config.path == MEMORY_PATH {
            Database::builder().create_with_backend(InMemoryBackend::new())?
        } else {
            let path = Path::new(&config.path);
            if config.create_dirs {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
            }
            Database::create(path)?
        };

        // Read transactions fail on a table that was never written.
        let txn = db.begin_write()?;
        txn.open_table(UNIFIED_TABLE)?;
        txn.commit()?;

        tracing::debug!(path = %config.path, "Opened redb storage");
        Ok(Self {
            db: Arc::new(db),
            path: config.path,
        })
    }

    /// Open or create a redb backend at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(RedbBackendConfig::new(
            path.as_ref().to_string_lossy().to_string(),
        ))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl StorageBackend for RedbBackend {
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(UNIFIED_TABLE)?;
            t.insert(namespaced.as_str(), value)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_read()?;
        let t = txn.open_table(UNIFIED_TABLE)?;
        let value = t.get(namespaced.as_str())?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn delete(&self, table: &str, key: &str) -> Result<bool> {
        let namespaced = make_key(table, key);
        let txn = self.db.begin_write()?;
        let removed = {
            let mut t = txn.open_table(UNIFIED_TABLE)?;
            let previous = t.remove(namespaced.as_str())?;
            previous.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let table_prefix = make_key(table, prefix);
        let strip = table.len() + 1;

        let txn = self.db.begin_read()?;
        let t = txn.open_table(UNIFIED_TABLE)?;

        let mut results = Vec::new();
        for item in t.range(table_prefix.as_str()..)? {
            let (key, value) = item?;
            let key = key.value();
            if !key.starts_with(&table_prefix) {
                break;
            }
            if let Some(rest) = key.get(strip..) {
                results.push((rest.to_string(), value.value().to_vec()));
            }
        }
        Ok(results)
    }

    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut t = txn.open_table(UNIFIED_TABLE)?;
            for (key, value) in items {
                let namespaced = make_key(table, &key);
                t.insert(namespaced.as_str(), value.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn is_persistent(&self) -> bool {
        self.path != MEMORY_PATH
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = RedbBackendConfig::new("./data/test.redb").with_create_dirs(false);
        assert_eq!(config.path, "./data/test.redb");
        assert!(!config.create_dirs);
        assert_eq!(RedbBackendConfig::memory().path, MEMORY_PATH);
    }

    #[test]
    fn test_scan_stays_in_table() {
        let backend = RedbBackend::new(RedbBackendConfig::memory()).unwrap();
        backend.write("rules", "g1:r1", b"1").unwrap();
        backend.write("rules", "g1:r2", b"2").unwrap();
        backend.write("rules", "g2:r3", b"3").unwrap();
        backend.write("rulesx", "g1:r4", b"4").unwrap();

        let keys: Vec<String> = backend
            .scan("rules", "g1:")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["g1:r1", "g1:r2"]);
        assert_eq!(backend.scan("rules", "").unwrap().len(), 3);
        assert!(!backend.is_persistent());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relay.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.write("downlinks", "d1", b"payload").unwrap();
            assert!(!backend.delete("downlinks", "missing").unwrap());
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(
            backend.read("downlinks", "d1").unwrap(),
            Some(b"payload".to_vec())
        );
        assert!(backend.delete("downlinks", "d1").unwrap());
        assert_eq!(backend.read("downlinks", "d1").unwrap(), None);
    }
}
