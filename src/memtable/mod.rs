//! In-memory sorted tables.
//!
//! A memtable buffers incoming writes in key order before they are
//! materialized to disk. It is built on `crossbeam_skiplist::SkipMap`, which
//! gives lock-free concurrent readers, ordered traversal, and probabilistic
//! balancing without any unsafe code; the single writer is serialized by the
//! [`MemtableManager`].
//!
//! Every memtable is paired with a WAL file for durability: a record is
//! appended to the log before it lands in the map, and the log is deleted
//! only after the table's contents reach an SST. Tombstones are ordinary
//! records carrying the sentinel value, so a frozen table's iterator hands
//! them to the SST writer like any other entry.
//!
//! Lifecycle: **active** (absorbing writes) → **frozen** (read-only, queued
//! for eviction) → materialized as a level-0 SST and dropped.

pub mod manager;

pub use manager::MemtableManager;

use std::path::Path;

use crossbeam_skiplist::SkipMap;

use crate::codec::Record;
use crate::error::Result;
use crate::wal::Wal;

/// An in-memory sorted table with its write-ahead log.
#[derive(Debug)]
pub struct Memtable {
    id: u64,
    entries: SkipMap<Vec<u8>, Vec<u8>>,
    wal: Wal,
    approx_bytes: u64,
}

impl Memtable {
    /// Create an empty memtable with a fresh WAL file under `wal_dir`.
    pub fn new(wal_dir: &Path, id: u64) -> Result<Self> {
        Ok(Self {
            id,
            entries: SkipMap::new(),
            wal: Wal::create(wal_dir, id)?,
            approx_bytes: 0,
        })
    }

    /// Rebuild a memtable by replaying the WAL file at `path`. Records are
    /// inserted into the map only; the log already holds them.
    pub fn from_wal(path: &Path, id: u64) -> Result<Self> {
        let entries = SkipMap::new();
        let mut approx_bytes = 0;
        Wal::replay(path, |record| {
            approx_bytes += record.estimated_size();
            entries.insert(record.key, record.value);
        })?;
        Ok(Self {
            id,
            entries,
            wal: Wal::open(path)?,
            approx_bytes,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Approximate size of the buffered records in bytes.
    pub fn approx_bytes(&self) -> u64 {
        self.approx_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `record` fits without pushing the table past `max_bytes`.
    pub fn fits(&self, record: &Record, max_bytes: u64) -> bool {
        self.approx_bytes + record.estimated_size() <= max_bytes
    }

    /// Insert a record: WAL first, then the map. Overwrites any existing
    /// entry for the key.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        self.wal.append(&record)?;
        self.approx_bytes += record.estimated_size();
        self.entries.insert(record.key, record.value);
        Ok(())
    }

    /// Look up the stored value for `key`. Tombstones are returned as their
    /// sentinel value; the caller distinguishes them.
    pub fn search(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// The smallest entry, if any.
    pub fn first(&self) -> Option<Record> {
        self.entries
            .front()
            .map(|entry| Record::new(entry.key().clone(), entry.value().clone()))
    }

    /// Iterate all records in key order, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.entries
            .iter()
            .map(|entry| Record::new(entry.key().clone(), entry.value().clone()))
    }

    /// Force the WAL to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.wal.sync()
    }

    /// Seal the table against further writes.
    pub fn freeze(self) -> FrozenMemtable {
        FrozenMemtable { inner: self }
    }
}

/// A read-only memtable queued for materialization as a level-0 SST.
#[derive(Debug)]
pub struct FrozenMemtable {
    inner: Memtable,
}

impl FrozenMemtable {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn search(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.search(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = Record> + '_ {
        self.inner.iter()
    }

    /// Remove the WAL file once the table's contents are durable in an SST.
    pub fn delete_wal(self) -> Result<()> {
        self.inner.wal.delete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, TOMBSTONE};
    use crate::wal::wal_file_path;
    use tempfile::TempDir;

    #[test]
    fn test_insert_and_search() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut memtable = Memtable::new(dir.path(), 1).expect("failed to create memtable");

        memtable
            .insert(Record::new(b"key1".to_vec(), b"value1".to_vec()))
            .expect("insert failed");
        memtable
            .insert(Record::new(b"key2".to_vec(), b"value2".to_vec()))
            .expect("insert failed");
        memtable
            .insert(Record::tombstone(b"key3".to_vec()))
            .expect("insert failed");

        assert_eq!(memtable.search(b"key1"), Some(b"value1".to_vec()));
        assert_eq!(memtable.search(b"key2"), Some(b"value2".to_vec()));
        assert_eq!(memtable.search(b"key3"), Some(TOMBSTONE.to_vec()));
        assert_eq!(memtable.search(b"key4"), None);
    }

    #[test]
    fn test_insert_overwrites() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut memtable = Memtable::new(dir.path(), 1).expect("failed to create memtable");

        memtable
            .insert(Record::new(b"k".to_vec(), b"v1".to_vec()))
            .expect("insert failed");
        memtable
            .insert(Record::new(b"k".to_vec(), b"v2".to_vec()))
            .expect("insert failed");

        assert_eq!(memtable.search(b"k"), Some(b"v2".to_vec()));
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_iteration_is_key_ordered() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut memtable = Memtable::new(dir.path(), 1).expect("failed to create memtable");

        for key in [b"cherry".to_vec(), b"apple".to_vec(), b"banana".to_vec()] {
            memtable
                .insert(Record::new(key, b"fruit".to_vec()))
                .expect("insert failed");
        }

        let keys: Vec<_> = memtable.iter().map(|record| record.key).collect();
        assert_eq!(keys, vec![b"apple".to_vec(), b"banana".to_vec(), b"cherry".to_vec()]);
        assert_eq!(memtable.first().expect("empty").key, b"apple");
    }

    #[test]
    fn test_from_wal_restores_contents() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = wal_file_path(dir.path(), 9);

        let expected_bytes;
        {
            let mut memtable = Memtable::new(dir.path(), 9).expect("failed to create memtable");
            memtable
                .insert(Record::new(b"hello".to_vec(), b"world".to_vec()))
                .expect("insert failed");
            memtable
                .insert(Record::tombstone(b"bye".to_vec()))
                .expect("insert failed");
            memtable.sync().expect("sync failed");
            expected_bytes = memtable.approx_bytes();
        }

        let restored = Memtable::from_wal(&path, 9).expect("replay failed");
        assert_eq!(restored.id(), 9);
        assert_eq!(restored.search(b"hello"), Some(b"world".to_vec()));
        assert!(codec::is_tombstone(&restored.search(b"bye").expect("missing tombstone")));
        assert_eq!(restored.approx_bytes(), expected_bytes);
    }

    #[test]
    fn test_fits_tracks_estimated_size() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut memtable = Memtable::new(dir.path(), 1).expect("failed to create memtable");

        // 4 + 1 + 4 + 1 + 1 = 11 bytes per record.
        let record = Record::new(b"a".to_vec(), b"1".to_vec());
        assert!(memtable.fits(&record, 22));
        memtable.insert(record).expect("insert failed");

        let next = Record::new(b"b".to_vec(), b"2".to_vec());
        assert!(memtable.fits(&next, 22));
        memtable.insert(next).expect("insert failed");

        let third = Record::new(b"c".to_vec(), b"3".to_vec());
        assert!(!memtable.fits(&third, 22));
    }

    #[test]
    fn test_frozen_delete_wal() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut memtable = Memtable::new(dir.path(), 3).expect("failed to create memtable");
        memtable
            .insert(Record::new(b"k".to_vec(), b"v".to_vec()))
            .expect("insert failed");

        let frozen = memtable.freeze();
        assert_eq!(frozen.search(b"k"), Some(b"v".to_vec()));

        let path = wal_file_path(dir.path(), 3);
        assert!(path.exists());
        frozen.delete_wal().expect("delete failed");
        assert!(!path.exists());
    }
}
