//! Storage backend abstraction.
//!
//! Backends hold opaque bytes under `table:key` names. Typed access lives in
//! [`crate::collection::Collection`].

use crate::error::Result;

/// Key/value store shared by every repository.
pub trait StorageBackend: Send + Sync {
    /// Write a value to a key in the specified table.
    fn write(&self, table: &str, key: &str, value: &[u8]) -> Result<()>;

    /// Read a value by key from the specified table.
    fn read(&self, table: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a key from the specified table. Returns whether it existed.
    fn delete(&self, table: &str, key: &str) -> Result<bool>;

    /// Entries of the table whose key starts with `prefix`, in key order.
    fn scan(&self, table: &str, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// Write several values in one transaction.
    fn write_batch(&self, table: &str, items: Vec<(String, Vec<u8>)>) -> Result<()>;

    fn is_persistent(&self) -> bool;
}

/// Namespaced key in the unified table.
pub(crate) fn make_key(table: &str, key: &str) -> String {
    let mut result = String::with_capacity(table.len() + key.len() + 1);
    result.push_str(table);
    result.push(':');
    result.push_str(key);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_key() {
        assert_eq!(make_key("downlinks", "d1"), "downlinks:d1");
        assert_eq!(make_key("rules", ""), "rules:");
    }
}
