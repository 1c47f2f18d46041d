//! The active memtable and the frozen queue.
//!
//! One memtable is **active** and absorbs every write. When a record would
//! push it past `max_memtable_bytes` it is promoted: frozen, appended to the
//! queue, and replaced by a fresh table with a fresh id and WAL. When the
//! queue outgrows `max_frozen`, the oldest frozen table is popped and handed
//! back to the caller for materialization as a level-0 SST.
//!
//! All state transitions happen under one `RwLock`; reads take the shared
//! side and the skip lists themselves are lock-free underneath.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use itertools::Itertools;

use crate::codec::Record;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::id::{extract_file_id, IdGenerator};
use crate::memtable::{FrozenMemtable, Memtable};

/// Serializes writes across the active memtable and the frozen queue.
pub struct MemtableManager {
    config: Arc<Config>,
    ids: Arc<IdGenerator>,
    inner: RwLock<Inner>,
}

struct Inner {
    active: Memtable,
    /// Oldest at the head.
    frozen: VecDeque<FrozenMemtable>,
}

impl MemtableManager {
    pub fn new(config: Arc<Config>, ids: Arc<IdGenerator>) -> Result<Self> {
        let wal_dir = config.wal_dir();
        fs::create_dir_all(&wal_dir).map_err(|e| Error::io("mkdir", e))?;

        // Seed the id generator past any log already on disk so the
        // bootstrap table never appends to a previous run's WAL.
        let entries = fs::read_dir(&wal_dir).map_err(|e| Error::io("read", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read", e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("wal") {
                continue;
            }
            if let Some(id) = extract_file_id(&path) {
                ids.advance_past(id);
            }
        }

        let active = Memtable::new(&wal_dir, ids.next())?;
        Ok(Self {
            config,
            ids,
            inner: RwLock::new(Inner {
                active,
                frozen: VecDeque::new(),
            }),
        })
    }

    /// Insert a record. Returns the evicted frozen memtable when the insert
    /// promoted the active table and pushed the queue past its cap; the
    /// caller materializes it as a level-0 SST.
    pub fn insert(&self, record: Record) -> Result<Option<FrozenMemtable>> {
        let mut inner = self.inner.write().unwrap();

        if inner.active.fits(&record, self.config.max_memtable_bytes) {
            inner.active.insert(record)?;
            return Ok(None);
        }

        // Promote: freeze the active table and start a new one.
        let replacement = Memtable::new(&self.config.wal_dir(), self.ids.next())?;
        let full = std::mem::replace(&mut inner.active, replacement);
        inner.frozen.push_back(full.freeze());

        let evicted = if inner.frozen.len() > self.config.max_frozen {
            inner.frozen.pop_front()
        } else {
            None
        };

        inner.active.insert(record)?;
        Ok(evicted)
    }

    /// Delete a key by inserting a tombstone. The tombstone is logged and
    /// stored whether or not the key is present, so it shadows older
    /// versions living in frozen tables or SSTs.
    pub fn delete(&self, key: &[u8]) -> Result<Option<FrozenMemtable>> {
        self.insert(Record::tombstone(key.to_vec()))
    }

    /// Look up `key` in the active table, then the frozen queue newest to
    /// oldest. Tombstones come back as their sentinel value.
    pub fn search(&self, key: &[u8]) -> Option<Vec<u8>> {
        let inner = self.inner.read().unwrap();
        if let Some(value) = inner.active.search(key) {
            return Some(value);
        }
        inner
            .frozen
            .iter()
            .rev()
            .find_map(|memtable| memtable.search(key))
    }

    /// Force the active memtable's WAL to disk.
    pub fn sync(&self) -> Result<()> {
        self.inner.write().unwrap().active.sync()
    }

    pub fn frozen_count(&self) -> usize {
        self.inner.read().unwrap().frozen.len()
    }

    pub fn active_bytes(&self) -> u64 {
        self.inner.read().unwrap().active.approx_bytes()
    }

    /// Rebuild the memtables from the WAL files on disk.
    ///
    /// WALs are replayed in ascending id order: the newest becomes the
    /// active memtable, the remainder fills the frozen queue up to
    /// `max_frozen`, and the oldest overflow is returned so the caller can
    /// materialize it as level-0 SSTs. Surviving WALs are always newer than
    /// every flushed table (eviction pops the queue oldest-first), so fresh
    /// SST ids preserve the freshness order.
    pub fn recover(&self) -> Result<Vec<FrozenMemtable>> {
        let wal_dir = self.config.wal_dir();
        let mut inner = self.inner.write().unwrap();
        let bootstrap_id = inner.active.id();

        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        let entries = fs::read_dir(&wal_dir).map_err(|e| Error::io("read", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::io("read", e))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("wal") {
                continue;
            }
            let id = extract_file_id(&path).ok_or_else(|| {
                Error::decode("wal file name", path.display().to_string())
            })?;
            if id != bootstrap_id {
                found.push((id, path));
            }
        }

        let mut tables = found
            .into_iter()
            .sorted_by_key(|(id, _)| *id)
            .map(|(id, path)| Memtable::from_wal(&path, id))
            .collect::<Result<Vec<_>>>()?;

        if tables.is_empty() {
            return Ok(Vec::new());
        }
        if !inner.active.is_empty() {
            return Err(Error::InvalidInput(
                "recover must run before any writes".to_string(),
            ));
        }

        self.ids.advance_past(tables.last().unwrap().id());
        tracing::info!(
            wal_count = tables.len() + 1,
            "recovered memtables from write-ahead logs"
        );

        // The newest WAL becomes the active memtable; the empty bootstrap
        // table and its log are discarded.
        let newest = tables.pop().unwrap();
        let bootstrap = std::mem::replace(&mut inner.active, newest);
        bootstrap.freeze().delete_wal()?;

        let overflow_len = tables.len().saturating_sub(self.config.max_frozen);
        let overflow: Vec<FrozenMemtable> = tables
            .drain(..overflow_len)
            .map(Memtable::freeze)
            .collect();
        inner.frozen = tables.into_iter().map(Memtable::freeze).collect();

        Ok(overflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{is_tombstone, TOMBSTONE};
    use crate::wal::{wal_file_path, Wal};
    use tempfile::TempDir;

    fn manager_with(dir: &TempDir, max_memtable_bytes: u64, max_frozen: usize) -> MemtableManager {
        let config = Config::new(dir.path())
            .max_memtable_bytes(max_memtable_bytes)
            .max_frozen(max_frozen);
        MemtableManager::new(Arc::new(config), Arc::new(IdGenerator::new()))
            .expect("failed to create manager")
    }

    fn record(key: &str, value: &str) -> Record {
        Record::new(key.as_bytes().to_vec(), value.as_bytes().to_vec())
    }

    #[test]
    fn test_insert_and_search() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let manager = manager_with(&dir, 1024, 2);

        assert!(manager.insert(record("a", "1")).expect("insert failed").is_none());
        assert!(manager.insert(record("b", "2")).expect("insert failed").is_none());

        assert_eq!(manager.search(b"a"), Some(b"1".to_vec()));
        assert_eq!(manager.search(b"b"), Some(b"2".to_vec()));
        assert_eq!(manager.search(b"c"), None);
    }

    #[test]
    fn test_promotion_and_eviction() {
        let dir = TempDir::new().expect("failed to create temp dir");
        // Each "kNN" -> "vNN" record estimates to 4 + 3 + 4 + 3 + 1 = 15
        // bytes, so two fit per memtable.
        let manager = manager_with(&dir, 30, 1);

        for i in 0..4 {
            let evicted = manager
                .insert(record(&format!("k{i:02}"), &format!("v{i:02}")))
                .expect("insert failed");
            assert!(evicted.is_none(), "unexpected eviction at record {i}");
        }

        // Fifth record promotes a second frozen table and pops the first.
        let evicted = manager.insert(record("k04", "v04")).expect("insert failed");
        let evicted = evicted.expect("expected an eviction");
        assert_eq!(evicted.search(b"k00"), Some(b"v00".to_vec()));
        assert_eq!(evicted.search(b"k01"), Some(b"v01".to_vec()));

        // Everything still in memory remains readable.
        for i in 2..5 {
            let key = format!("k{i:02}");
            assert_eq!(
                manager.search(key.as_bytes()),
                Some(format!("v{i:02}").into_bytes())
            );
        }
    }

    #[test]
    fn test_newest_frozen_wins() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let manager = manager_with(&dir, 30, 5);

        // Fill two memtables with the same key at different values, plus
        // filler to force promotion.
        manager.insert(record("dup", "old")).expect("insert failed");
        manager.insert(record("f1", "xx")).expect("insert failed");
        manager.insert(record("dup", "new")).expect("insert failed");
        manager.insert(record("f2", "xx")).expect("insert failed");
        manager.insert(record("f3", "xx")).expect("insert failed");

        assert_eq!(manager.frozen_count(), 2);
        assert_eq!(manager.search(b"dup"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_delete_is_logged_for_absent_keys() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let manager = manager_with(&dir, 1024, 2);

        // The key was never written here; the tombstone must still be
        // recorded so it shadows copies in older tables after recovery.
        manager.delete(b"elsewhere").expect("delete failed");
        assert_eq!(manager.search(b"elsewhere"), Some(TOMBSTONE.to_vec()));
        manager.sync().expect("sync failed");

        let mut replayed = Vec::new();
        Wal::replay(&wal_file_path(&dir.path().join("wal"), 1), |r| replayed.push(r))
            .expect("replay failed");
        assert_eq!(replayed.len(), 1);
        assert!(replayed[0].is_tombstone());
    }

    #[test]
    fn test_recover_rebuilds_active_and_frozen() {
        let dir = TempDir::new().expect("failed to create temp dir");
        {
            let manager = manager_with(&dir, 30, 5);
            manager.insert(record("a", "1")).expect("insert failed");
            manager.insert(record("b", "2")).expect("insert failed");
            manager.insert(record("c", "3")).expect("insert failed"); // promotes
            manager.insert(record("d", "4")).expect("insert failed");
            manager.insert(record("e", "5")).expect("insert failed"); // promotes
            manager.sync().expect("sync failed");
            assert_eq!(manager.frozen_count(), 2);
        }

        let manager = manager_with(&dir, 30, 5);
        let overflow = manager.recover().expect("recover failed");
        assert!(overflow.is_empty());
        assert_eq!(manager.frozen_count(), 2);

        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3"), ("d", "4"), ("e", "5")] {
            assert_eq!(
                manager.search(key.as_bytes()),
                Some(value.as_bytes().to_vec()),
                "missing {key} after recovery"
            );
        }
    }

    #[test]
    fn test_recover_returns_overflow_oldest_first() {
        let dir = TempDir::new().expect("failed to create temp dir");
        {
            // max_frozen = 5 while writing so nothing is evicted.
            let manager = manager_with(&dir, 30, 5);
            for i in 0..8 {
                manager
                    .insert(record(&format!("k{i:02}"), &format!("v{i:02}")))
                    .expect("insert failed");
            }
            manager.sync().expect("sync failed");
            assert_eq!(manager.frozen_count(), 3);
        }

        // Recover with a smaller queue: one frozen table overflows.
        let manager = manager_with(&dir, 30, 2);
        let overflow = manager.recover().expect("recover failed");
        assert_eq!(overflow.len(), 1);
        assert_eq!(overflow[0].search(b"k00"), Some(b"v00".to_vec()));
        assert_eq!(manager.frozen_count(), 2);
    }

    #[test]
    fn test_tombstone_survives_recovery() {
        let dir = TempDir::new().expect("failed to create temp dir");
        {
            let manager = manager_with(&dir, 1024, 2);
            manager.insert(record("k", "v")).expect("insert failed");
            manager.delete(b"k").expect("delete failed");
            manager.sync().expect("sync failed");
        }

        let manager = manager_with(&dir, 1024, 2);
        manager.recover().expect("recover failed");
        let value = manager.search(b"k").expect("tombstone missing");
        assert!(is_tombstone(&value));
    }
}
