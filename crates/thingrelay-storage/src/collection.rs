//! Typed JSON records over a [`StorageBackend`] table.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::StorageBackend;
use crate::error::{Error, Result};

/// A table of `T` records serialised with `serde_json`.
pub struct Collection<T> {
    backend: Arc<dyn StorageBackend>,
    table: &'static str,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            table: self.table,
            _record: PhantomData,
        }
    }
}

impl<T: Serialize + DeserializeOwned> Collection<T> {
    pub fn new(backend: Arc<dyn StorageBackend>, table: &'static str) -> Self {
        Self {
            backend,
            table,
            _record: PhantomData,
        }
    }

    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn put(&self, key: &str, record: &T) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey(format!("empty key in {}", self.table)));
        }
        let bytes = serde_json::to_vec(record)?;
        self.backend.write(self.table, key, &bytes)
    }

    pub fn put_batch<'a, I>(&self, records: I) -> Result<()>
    where
        T: 'a,
        I: IntoIterator<Item = (String, &'a T)>,
    {
        let mut items = Vec::new();
        for (key, record) in records {
            if key.is_empty() {
                return Err(Error::InvalidKey(format!("empty key in {}", self.table)));
            }
            items.push((key, serde_json::to_vec(record)?));
        }
        self.backend.write_batch(self.table, items)
    }

    pub fn get(&self, key: &str) -> Result<Option<T>> {
        match self.backend.read(self.table, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`Collection::get`] but a missing record is [`Error::NotFound`].
    pub fn require(&self, key: &str) -> Result<T> {
        self.get(key)?
            .ok_or_else(|| Error::NotFound(format!("{} {}", self.table, key)))
    }

    pub fn remove(&self, key: &str) -> Result<bool> {
        self.backend.delete(self.table, key)
    }

    /// Records whose key starts with `prefix`, in key order.
    pub fn scan(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        self.backend
            .scan(self.table, prefix)?
            .into_iter()
            .map(|(key, bytes)| Ok((key, serde_json::from_slice(&bytes)?)))
            .collect()
    }

    pub fn values(&self, prefix: &str) -> Result<Vec<T>> {
        Ok(self.scan(prefix)?.into_iter().map(|(_, v)| v).collect())
    }

    pub fn all(&self) -> Result<Vec<T>> {
        self.values("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    fn notes() -> Collection<Note> {
        Collection::new(Arc::new(MemoryBackend::new()), "notes")
    }

    #[test]
    fn test_put_get_remove() {
        let notes = notes();
        let note = Note { text: "hi".into() };
        notes.put("n1", &note).unwrap();
        assert_eq!(notes.get("n1").unwrap(), Some(note.clone()));
        assert_eq!(notes.require("n1").unwrap(), note);
        assert!(notes.remove("n1").unwrap());
        assert!(matches!(notes.require("n1"), Err(Error::NotFound(_))));
        assert!(matches!(notes.put("", &note), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn test_batch_and_prefix_listing() {
        let notes = notes();
        let a = Note { text: "a".into() };
        let b = Note { text: "b".into() };
        notes
            .put_batch(vec![("x:1".to_string(), &a), ("y:1".to_string(), &b)])
            .unwrap();
        assert_eq!(notes.values("x:").unwrap(), vec![a]);
        assert_eq!(notes.all().unwrap().len(), 2);
    }
}
