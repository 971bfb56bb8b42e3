//! Book catalog storage: the durable home of reading progress.
//!
//! The coordinator only needs `get_by_id` and `update`. Two backends are
//! provided: an in-memory map and a JSON library file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;

/// Persisted reading progress for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub current_word_index: usize,
    pub total_words: usize,
    /// 0 means no speed has been saved yet
    #[serde(default)]
    pub last_wpm: u32,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl BookRecord {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            current_word_index: 0,
            total_words: 0,
            last_wpm: 0,
            last_accessed: None,
        }
    }

    /// Fraction of the book read at the last save.
    pub fn progress(&self) -> f64 {
        if self.total_words == 0 {
            0.0
        } else {
            self.current_word_index as f64 / self.total_words as f64
        }
    }

    fn validate(&self) -> Result<(), StoreError> {
        if self.current_word_index > self.total_words {
            return Err(StoreError::InvalidRecord {
                id: self.id.clone(),
                index: self.current_word_index,
                total: self.total_words,
            });
        }
        Ok(())
    }
}

/// Read/write access to book records keyed by id.
pub trait BookStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError>;

    /// Overwrite an existing record. Unknown ids are `StoreError::NotFound`.
    fn update(&self, record: &BookRecord) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryBookStore {
    records: Mutex<HashMap<String, BookRecord>>,
    writes: AtomicUsize,
}

impl MemoryBookStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, BookRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace a record without counting it as a write.
    pub fn insert(&self, record: BookRecord) {
        self.records().insert(record.id.clone(), record);
    }

    /// Number of successful `update` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl BookStore for MemoryBookStore {
    fn get_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        Ok(self.records().get(id).cloned())
    }

    fn update(&self, record: &BookRecord) -> Result<(), StoreError> {
        record.validate()?;
        let mut records = self.records();
        let slot = records
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        *slot = record.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Library file holding every record as one JSON object keyed by id.
#[derive(Debug)]
pub struct JsonBookStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonBookStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `<data dir>/readpace/library.json`, if a data directory is known.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("readpace").join("library.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a record, replacing any existing record with the same id.
    pub fn insert(&self, record: &BookRecord) -> Result<(), StoreError> {
        record.validate()?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut library = self.read_library()?;
        library.insert(record.id.clone(), record.clone());
        self.write_library(&library)
    }

    pub fn list(&self) -> Result<Vec<BookRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_library()?.into_values().collect())
    }

    fn read_library(&self) -> Result<BTreeMap<String, BookRecord>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write to a sibling temp file, then rename over the library.
    fn write_library(&self, library: &BTreeMap<String, BookRecord>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(library)?;
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("Wrote {} records to {}", library.len(), self.path.display());
        Ok(())
    }
}

impl BookStore for JsonBookStore {
    fn get_by_id(&self, id: &str) -> Result<Option<BookRecord>, StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_library()?.remove(id))
    }

    fn update(&self, record: &BookRecord) -> Result<(), StoreError> {
        record.validate()?;
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut library = self.read_library()?;
        let slot = library
            .get_mut(&record.id)
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))?;
        *slot = record.clone();
        self.write_library(&library)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, index: usize, total: usize) -> BookRecord {
        BookRecord {
            current_word_index: index,
            total_words: total,
            last_wpm: 300,
            ..BookRecord::new(id, "Title")
        }
    }

    #[test]
    fn memory_store_updates_existing_records_only() {
        let store = MemoryBookStore::new();
        assert!(matches!(
            store.update(&record("a", 1, 10)),
            Err(StoreError::NotFound(id)) if id == "a"
        ));

        store.insert(record("a", 0, 10));
        store.update(&record("a", 7, 10)).unwrap();

        assert_eq!(store.get_by_id("a").unwrap().unwrap().current_word_index, 7);
        assert_eq!(store.write_count(), 1);
        assert!(store.get_by_id("missing").unwrap().is_none());
    }

    #[test]
    fn index_past_total_is_rejected() {
        let store = MemoryBookStore::new();
        store.insert(record("a", 0, 10));
        assert!(matches!(
            store.update(&record("a", 11, 10)),
            Err(StoreError::InvalidRecord { index: 11, total: 10, .. })
        ));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn json_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("library.json");

        let store = JsonBookStore::new(&path);
        assert_eq!(store.path(), path.as_path());
        assert!(store.get_by_id("a").unwrap().is_none());
        store.insert(&record("a", 0, 200)).unwrap();
        store.insert(&record("b", 0, 50)).unwrap();

        let mut updated = record("a", 120, 200);
        updated.last_accessed = Some(Utc::now());
        store.update(&updated).unwrap();

        let reopened = JsonBookStore::new(&path);
        assert_eq!(reopened.get_by_id("a").unwrap(), Some(updated));
        assert_eq!(reopened.list().unwrap().len(), 2);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn json_store_rejects_unknown_ids_and_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("library.json");
        let store = JsonBookStore::new(&path);

        assert!(matches!(
            store.update(&record("ghost", 0, 1)),
            Err(StoreError::NotFound(_))
        ));

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(store.get_by_id("a"), Err(StoreError::Serde(_))));
    }

    #[test]
    fn record_progress_fraction() {
        assert_eq!(record("a", 50, 200).progress(), 0.25);
        assert_eq!(BookRecord::new("b", "").progress(), 0.0);
    }
}
