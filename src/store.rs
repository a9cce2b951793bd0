//! Bounded record cache with file-backed persistence.
//!
//! The store keeps the most recently reported record per station in memory,
//! bounded by a least-recently-used policy, and mirrors every change into a
//! single pretty-printed JSON array on disk. Disk writes are deferred: `put`,
//! `remove` and eviction only mark a pending change, and [`RecordStore::sync_to_file`]
//! folds all pending changes into the document with an atomic replace.

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{AggError, Result};
use crate::record::Record;

/// default number of records the store admits before evicting
pub const DEFAULT_CAPACITY: usize = 20;

/// Lifecycle of the on-disk cache document, decided once at boot.
///
/// The first successful push after `Created` is reported to the producer with
/// status 201; [`RecordStore::consume_file_status`] collapses the state to
/// `Exists` at that point. `CreateFailed` makes every push answer 500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFileStatus {
    /// the document did not exist and was created empty at boot
    Created,
    /// the document already existed at boot, or the first push was acknowledged
    Exists,
    /// the document could not be created at boot
    CreateFailed,
}

/// A bounded, keyed cache of the latest [`Record`] per station.
#[derive(Debug)]
pub struct RecordStore {
    // path of the persisted JSON document
    path: PathBuf,

    // maximum number of entries held in memory
    capacity: usize,

    // latest record per station id
    entries: HashMap<String, Record>,

    // station ids from least to most recently used
    recency: Vec<String>,

    // changes not yet folded into the document; None marks a deletion
    pending: HashMap<String, Option<Record>>,

    file_status: CacheFileStatus,
}

impl RecordStore {
    /// Opens a store persisted at `path`, holding at most `capacity` records.
    ///
    /// The cache document is created empty when absent; failure to create it
    /// is remembered as [`CacheFileStatus::CreateFailed`] rather than
    /// returned, so the server can still serve from memory. Any readable
    /// document content is loaded back into the cache.
    pub fn open(path: &Path, capacity: usize) -> RecordStore {
        let file_status = init_cache_file(path);
        let mut store = RecordStore {
            path: path.to_path_buf(),
            capacity,
            entries: HashMap::new(),
            recency: Vec::new(),
            pending: HashMap::new(),
            file_status,
        };
        store.load_from_file();
        store
    }

    /// inserts or replaces the record stored under `id` and marks it most
    /// recently used, evicting the least recently used entry when full
    pub fn put(&mut self, id: &str, record: Record) {
        self.pending.insert(id.to_string(), Some(record.clone()));
        if self.entries.insert(id.to_string(), record).is_none() {
            self.recency.push(id.to_string());
        } else {
            self.touch(id);
        }
        self.evict_over_capacity();
    }

    /// returns the record stored under `id` and marks it most recently used
    pub fn get(&mut self, id: &str) -> Option<Record> {
        let record = self.entries.get(id).cloned();
        if record.is_some() {
            self.touch(id);
        }
        record
    }

    /// deletes the record stored under `id` and marks the deletion for the
    /// next sync
    pub fn remove(&mut self, id: &str) {
        self.entries.remove(id);
        self.recency.retain(|entry| entry != id);
        self.pending.insert(id.to_string(), None);
    }

    /// returns a copy of the current records from least to most recently used
    pub fn snapshot(&self) -> Vec<Record> {
        self.recency
            .iter()
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    /// true when changes are waiting to be folded into the document
    pub fn has_pending_writes(&self) -> bool {
        !self.pending.is_empty()
    }

    /// number of records currently cached
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// true when no records are cached
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// true when a record is cached under `id`
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// path of the persisted document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the document status, collapsing `Created` to `Exists`.
    ///
    /// The caller acknowledging the first push sees `Created` exactly once.
    pub fn consume_file_status(&mut self) -> CacheFileStatus {
        let status = self.file_status;
        if status == CacheFileStatus::Created {
            self.file_status = CacheFileStatus::Exists;
        }
        status
    }

    /// Folds all pending changes into the on-disk document.
    ///
    /// The merged document is written to `<path>.tmp`, the previous document
    /// is moved aside to `<path>.bak`, the temporary file is renamed into
    /// place and the backup is discarded. The document is therefore always
    /// either absent or a complete array from some past consistent snapshot,
    /// never a partial write.
    ///
    /// # Errors
    ///
    /// Returns [`AggError::FileSync`] when any step fails. The pending set is
    /// kept so the next sweep retries.
    pub fn sync_to_file(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut document = self.read_file_map();
        for (id, change) in &self.pending {
            match change {
                Some(record) => {
                    document.insert(id.clone(), record.clone());
                }
                None => {
                    document.remove(id);
                }
            }
        }

        let merged: Vec<&Record> = document.values().collect();
        let body = serde_json::to_string_pretty(&merged)?;

        let tmp_path = sibling(&self.path, ".tmp");
        let bak_path = sibling(&self.path, ".bak");

        fs::write(&tmp_path, body).map_err(|source| AggError::FileSync { source })?;
        if self.path.exists() {
            fs::rename(&self.path, &bak_path)
                .map_err(|source| AggError::FileSync { source })?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|source| AggError::FileSync { source })?;
        // a stale backup is harmless, so its removal is best effort
        if bak_path.exists() {
            let _ = fs::remove_file(&bak_path);
        }

        self.pending.clear();
        debug!(
            path = %self.path.display(),
            entries = document.len(),
            "cache document synced"
        );
        Ok(())
    }

    // Best-effort load at boot; unreadable content starts the cache empty.
    fn load_from_file(&mut self) {
        for (id, record) in self.read_file_map() {
            if self.entries.insert(id.clone(), record).is_none() {
                self.recency.push(id);
            }
        }
        // the document may hold more entries than the cache admits
        self.evict_over_capacity();
    }

    // Reads the document into a map keyed by station id. A missing, empty or
    // malformed document reads as empty.
    fn read_file_map(&self) -> BTreeMap<String, Record> {
        let mut map = BTreeMap::new();
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return map,
        };
        if content.trim().is_empty() {
            return map;
        }
        match serde_json::from_str::<Vec<Record>>(&content) {
            Ok(records) => {
                for record in records {
                    if let Ok(id) = record.require_id() {
                        map.insert(id.to_string(), record);
                    }
                }
            }
            Err(err) => warn!(
                path = %self.path.display(),
                %err,
                "cache document unreadable, starting empty"
            ),
        }
        map
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recency.iter().position(|entry| entry == id) {
            let entry = self.recency.remove(pos);
            self.recency.push(entry);
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            let victim = self.recency.remove(0);
            self.entries.remove(&victim);
            debug!(id = %victim, "evicting least recently used record");
            self.pending.insert(victim, None);
        }
    }
}

// <path>.tmp / <path>.bak next to the document
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn init_cache_file(path: &Path) -> CacheFileStatus {
    if path.exists() {
        return CacheFileStatus::Exists;
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(path = %path.display(), %err, "could not create cache directory");
                return CacheFileStatus::CreateFailed;
            }
        }
    }
    match fs::File::create(path) {
        Ok(_) => CacheFileStatus::Created,
        Err(err) => {
            warn!(path = %path.display(), %err, "could not create cache document");
            CacheFileStatus::CreateFailed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(id: &str, temp: f64) -> Record {
        Record::from_json(&format!(r#"{{"id":"{}","air_temp":{:?}}}"#, id, temp))
            .expect("test record should parse")
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().filter_map(Record::id).collect()
    }

    #[test]
    fn fresh_path_reports_created_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        assert!(path.exists());
        assert_eq!(store.consume_file_status(), CacheFileStatus::Created);
        assert_eq!(store.consume_file_status(), CacheFileStatus::Exists);
    }

    #[test]
    fn existing_path_reports_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "[]").unwrap();
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        assert_eq!(store.consume_file_status(), CacheFileStatus::Exists);
    }

    #[test]
    fn unwritable_path_reports_create_failed() {
        let dir = tempdir().unwrap();
        // the parent of the cache path is a regular file, so creation fails
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let path = blocker.join("sub").join("cache.json");
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        assert_eq!(store.consume_file_status(), CacheFileStatus::CreateFailed);
    }

    #[test]
    fn capacity_is_never_exceeded_and_lru_is_evicted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = RecordStore::open(&path, 3);
        for (n, id) in ["a", "b", "c"].iter().enumerate() {
            store.put(id, record(id, n as f64));
        }
        // reading "a" protects it; "b" becomes the eviction victim
        assert!(store.get("a").is_some());
        store.put("d", record("d", 9.0));
        assert_eq!(store.len(), 3);
        assert!(!store.contains("b"));
        assert_eq!(ids(&store.snapshot()), vec!["c", "a", "d"]);
    }

    #[test]
    fn eviction_is_folded_into_the_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = RecordStore::open(&path, 2);
        store.put("a", record("a", 1.0));
        store.put("b", record("b", 2.0));
        store.sync_to_file().unwrap();
        store.put("c", record("c", 3.0)); // evicts "a"
        store.sync_to_file().unwrap();

        let on_disk: Vec<Record> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let mut on_disk_ids = ids(&on_disk);
        on_disk_ids.sort_unstable();
        assert_eq!(on_disk_ids, vec!["b", "c"]);
    }

    #[test]
    fn sync_replaces_atomically_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        store.put("a", record("a", 1.0));
        store.sync_to_file().unwrap();
        store.put("a", record("a", 2.0));
        store.sync_to_file().unwrap();

        assert!(!sibling(&path, ".tmp").exists());
        assert!(!sibling(&path, ".bak").exists());
        let on_disk: Vec<Record> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.len(), 1);
        assert_eq!(on_disk[0].get("air_temp"), Some(&serde_json::json!(2.0)));
        assert!(!store.has_pending_writes());
    }

    #[test]
    fn failed_sync_keeps_pending_writes() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let path = blocker.join("sub").join("cache.json");
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        store.put("a", record("a", 1.0));
        assert!(matches!(
            store.sync_to_file(),
            Err(AggError::FileSync { .. })
        ));
        assert!(store.has_pending_writes());
    }

    #[test]
    fn boot_reloads_persisted_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        {
            let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
            store.put("a", record("a", 1.0));
            store.put("b", record("b", 2.0));
            store.sync_to_file().unwrap();
        }
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        assert_eq!(store.len(), 2);
        assert!(store.get("a").is_some());
        assert!(!store.has_pending_writes());
    }

    #[test]
    fn malformed_document_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        let store = RecordStore::open(&path, DEFAULT_CAPACITY);
        assert!(store.is_empty());
    }

    #[test]
    fn removal_is_folded_into_the_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let mut store = RecordStore::open(&path, DEFAULT_CAPACITY);
        store.put("a", record("a", 1.0));
        store.sync_to_file().unwrap();
        store.remove("a");
        store.sync_to_file().unwrap();

        let on_disk: Vec<Record> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }
}
