//! The database facade.
//!
//! [`Database`] wires the memtable manager and the level manager together
//! behind the point API: `open`, `put`, `get`, `delete`, `recover`. All
//! operations take `&self` and the handle is `Send + Sync`, so one instance
//! can serve a writer thread and any number of reader threads.

use std::sync::Arc;

use crate::codec::{self, Record, MAX_KEY_BYTES, MAX_VALUE_BYTES};
use crate::compaction;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::level::LevelManager;
use crate::memtable::{FrozenMemtable, MemtableManager};

/// A snapshot of the store's shape, for monitoring and tests.
#[derive(Debug, Clone)]
pub struct Stats {
    pub active_memtable_bytes: u64,
    pub frozen_memtables: usize,
    /// Table count per level, shallowest first.
    pub tables_per_level: Vec<usize>,
}

/// A persistent ordered key-value store.
pub struct Database {
    memtables: MemtableManager,
    levels: Arc<LevelManager>,
}

impl Database {
    /// Open a store rooted at the configured directories, creating them as
    /// needed. Call [`Database::recover`] before writing when the
    /// directories hold state from a previous run.
    pub fn open(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let ids = Arc::new(IdGenerator::new());
        let levels = Arc::new(LevelManager::new(config.clone(), ids.clone())?);
        let memtables = MemtableManager::new(config, ids)?;
        Ok(Self { memtables, levels })
    }

    /// Insert or update a key. Once this returns, the record is in the
    /// active memtable's WAL and visible to subsequent reads.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        check_key(key)?;
        if value.len() > MAX_VALUE_BYTES {
            return Err(Error::Capacity(format!(
                "value length {} exceeds the {MAX_VALUE_BYTES} byte bound",
                value.len()
            )));
        }
        if codec::is_tombstone(value) {
            return Err(Error::InvalidInput(
                "value collides with the reserved tombstone sentinel".to_string(),
            ));
        }

        let record = Record::new(key.to_vec(), value.to_vec());
        if let Some(evicted) = self.memtables.insert(record)? {
            self.flush_frozen(evicted)?;
        }
        Ok(())
    }

    /// Look up a key: active memtable, frozen queue newest-first, then the
    /// levels shallowest-first. Returns `None` for missing and deleted keys
    /// alike.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        check_key(key)?;
        if let Some(value) = self.memtables.search(key) {
            if codec::is_tombstone(&value) {
                return Ok(None);
            }
            return Ok(Some(value));
        }
        self.levels.search(key)
    }

    /// Delete a key by writing a tombstone. The tombstone is recorded even
    /// if the key was never written, so copies at deeper levels stay
    /// shadowed.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        check_key(key)?;
        if let Some(evicted) = self.memtables.delete(key)? {
            self.flush_frozen(evicted)?;
        }
        Ok(())
    }

    /// Rebuild the committed state from disk: register every SST, replay
    /// every WAL, and reseed the id generator past everything seen. Must
    /// run before the first write.
    pub fn recover(&self) -> Result<()> {
        self.levels.recover()?;

        // The newest WAL becomes the active memtable and the remainder the
        // frozen queue; anything past the queue cap is materialized as
        // level-0 SSTs so every record stays reachable.
        let overflow = self.memtables.recover()?;
        for frozen in overflow {
            self.flush_frozen(frozen)?;
        }
        Ok(())
    }

    /// Materialize an evicted frozen memtable at level 0 and run the
    /// compaction trigger.
    fn flush_frozen(&self, frozen: FrozenMemtable) -> Result<()> {
        self.levels.create_new_sst(frozen)?;
        compaction::maybe_compact(&self.levels);
        Ok(())
    }

    /// Force the active memtable's WAL to disk.
    pub fn sync(&self) -> Result<()> {
        self.memtables.sync()
    }

    pub fn stats(&self) -> Stats {
        Stats {
            active_memtable_bytes: self.memtables.active_bytes(),
            frozen_memtables: self.memtables.frozen_count(),
            tables_per_level: self.levels.table_counts(),
        }
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() > MAX_KEY_BYTES {
        return Err(Error::Capacity(format!(
            "key length {} exceeds the {MAX_KEY_BYTES} byte bound",
            key.len()
        )));
    }
    Ok(())
}
