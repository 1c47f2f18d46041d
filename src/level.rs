//! The leveled SST registry.
//!
//! The manager indexes every on-disk table by level. Level 0 tables may
//! overlap and are probed newest-first; level 1 and deeper are pairwise
//! disjoint once compaction has settled. All registry state sits behind one
//! mutex; a condition variable keyed on that mutex signals compaction
//! completion so readers can wait out a level being rewritten.
//!
//! Lock order everywhere: manager mutex → level-private state → filesystem.
//! Registry mutations happen under the mutex; file unlinks happen after it
//! is released so slow disks never block readers.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};

use itertools::Itertools;

use crate::codec;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::id::{extract_file_id, IdGenerator};
use crate::memtable::FrozenMemtable;
use crate::sstable::{self, SSTable, TableBuilder};

/// Mutex-protected registry of every live SST, by level.
pub struct LevelManager {
    config: Arc<Config>,
    ids: Arc<IdGenerator>,
    state: Mutex<LevelState>,
    compaction_done: Condvar,
}

struct LevelState {
    /// Per level, newest table first (by id).
    levels: Vec<Vec<Arc<SSTable>>>,
    /// Every registered table by path.
    file_index: HashMap<PathBuf, Arc<SSTable>>,
    /// Authoritative path registry per level.
    total_paths: Vec<Vec<PathBuf>>,
    /// Levels currently being rewritten by a compaction.
    compacting: Vec<bool>,
}

impl LevelManager {
    pub fn new(config: Arc<Config>, ids: Arc<IdGenerator>) -> Result<Self> {
        let level_count = config.levels_max + 1;
        for level in 0..level_count {
            let dir = sstable::level_dir(&config.sstable_dir(), level);
            fs::create_dir_all(&dir).map_err(|e| Error::io("mkdir", e))?;
        }

        // Seed the id generator past any table already on disk.
        for level in 0..level_count {
            let dir = sstable::level_dir(&config.sstable_dir(), level);
            let entries = fs::read_dir(&dir).map_err(|e| Error::io("read", e))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io("read", e))?;
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("sst") {
                    continue;
                }
                if let Some(id) = extract_file_id(&path) {
                    ids.advance_past(id);
                }
            }
        }

        Ok(Self {
            config,
            ids,
            state: Mutex::new(LevelState {
                levels: vec![Vec::new(); level_count],
                file_index: HashMap::new(),
                total_paths: vec![Vec::new(); level_count],
                compacting: vec![false; level_count],
            }),
            compaction_done: Condvar::new(),
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Register a table: prepend to its level (newest first) and record it
    /// in the path registries.
    pub fn add_table(&self, table: Arc<SSTable>) {
        let mut state = self.state.lock().unwrap();
        let level = table.level();
        state.file_index.insert(table.path().to_path_buf(), table.clone());
        state.total_paths[level].push(table.path().to_path_buf());
        state.levels[level].insert(0, table);
    }

    /// Register a batch of freshly written tables.
    pub fn add_new_ssts(&self, tables: Vec<SSTable>) {
        for table in tables {
            self.add_table(Arc::new(table));
        }
    }

    /// Materialize a frozen memtable as a level-0 SST and delete its WAL.
    /// The caller follows up with the compaction trigger. A failure before
    /// registration leaves no half-registered table behind.
    pub fn create_new_sst(&self, frozen: FrozenMemtable) -> Result<()> {
        if frozen.is_empty() {
            frozen.delete_wal()?;
            return Ok(());
        }

        let mut builder = TableBuilder::new(self.ids.next(), 0);
        for record in frozen.iter() {
            builder.add(record.key, record.value);
        }
        let table = builder.finish(&self.config.sstable_dir())?;
        tracing::info!(
            table_id = table.id(),
            entries = table.index.len(),
            "materialized frozen memtable at level 0"
        );

        self.add_table(Arc::new(table));
        frozen.delete_wal()
    }

    /// Point lookup across all levels, shallowest first. Within level 0 the
    /// newest table wins; deeper levels are disjoint. A tombstone ends the
    /// search: the key is deleted, not merely absent here.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        for level in 0..=self.config.levels_max {
            'rescan: loop {
                let tables = {
                    let mut state = self.state.lock().unwrap();
                    // Level 0 is compacted synchronously with the writer and
                    // swapped atomically; readers only wait on deeper levels.
                    if level >= 1 {
                        while state.compacting[level] {
                            state = self.compaction_done.wait(state).unwrap();
                        }
                    }
                    state.levels[level].clone()
                };

                for table in &tables {
                    if !table.may_have(key) {
                        continue;
                    }
                    match table.get(key) {
                        Ok(Some(value)) if codec::is_tombstone(&value) => return Ok(None),
                        Ok(Some(value)) => return Ok(Some(value)),
                        Ok(None) => {}
                        Err(err) => {
                            let state = self.state.lock().unwrap();
                            if state.file_index.contains_key(table.path()) {
                                return Err(err);
                            }
                            // The table was unregistered while we probed it:
                            // a compaction moved this level under us. Rescan.
                            drop(state);
                            continue 'rescan;
                        }
                    }
                }
                break;
            }
        }
        Ok(None)
    }

    /// Rehydrate the registry from `{sstable_dir}/{level}-level/*.sst` and
    /// reseed the id generator past everything found.
    pub fn recover(&self) -> Result<()> {
        let mut max_id = 0;
        let mut total = 0;
        for level in 0..=self.config.levels_max {
            let dir = sstable::level_dir(&self.config.sstable_dir(), level);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::io("read", e)),
            };

            let mut found: Vec<(u64, PathBuf)> = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|e| Error::io("read", e))?;
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("sst") {
                    continue;
                }
                let id = extract_file_id(&path).ok_or_else(|| {
                    Error::decode("table file name", path.display().to_string())
                })?;
                found.push((id, path));
            }

            for (id, path) in found.into_iter().sorted_by_key(|(id, _)| *id) {
                let table = SSTable::decode_from(&path, level)?;
                max_id = max_id.max(id);
                total += 1;
                self.add_table(Arc::new(table));
            }
        }

        self.ids.advance_past(max_id);
        tracing::info!(tables = total, max_id, "recovered sstable registry");
        Ok(())
    }

    /// Unregister tables and unlink their files. The registry mutation
    /// happens under the mutex; the unlinks happen after it is released.
    pub fn remove_old_ssts(&self, paths: &[PathBuf], level: usize) {
        {
            let mut state = self.state.lock().unwrap();
            for path in paths {
                state.file_index.remove(path);
                state.total_paths[level].retain(|p| p != path);
                state.levels[level].retain(|table| table.path() != path);
            }
        }
        for path in paths {
            if let Err(err) = fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %err, "failed to unlink old sstable");
            }
        }
    }

    /// Snapshot of a level's tables, newest first.
    pub fn tables_at(&self, level: usize) -> Vec<Arc<SSTable>> {
        self.state.lock().unwrap().levels[level].clone()
    }

    pub fn table_count(&self, level: usize) -> usize {
        self.state.lock().unwrap().levels[level].len()
    }

    pub fn table_counts(&self) -> Vec<usize> {
        let state = self.state.lock().unwrap();
        state.levels.iter().map(Vec::len).collect()
    }

    /// Mark `level` and `level + 1` as compacting, waiting out any
    /// compaction already touching either. A compaction rewrites its source
    /// level and restructures the target, so both are claimed.
    pub(crate) fn begin_compaction(&self, level: usize) {
        let mut state = self.state.lock().unwrap();
        while state.compacting[level] || state.compacting[level + 1] {
            state = self.compaction_done.wait(state).unwrap();
        }
        state.compacting[level] = true;
        state.compacting[level + 1] = true;
    }

    /// Clear the compaction flags and wake every waiting reader.
    pub(crate) fn end_compaction(&self, level: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.compacting[level] = false;
            state.compacting[level + 1] = false;
        }
        self.compaction_done.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn is_compacting(&self, level: usize) -> bool {
        self.state.lock().unwrap().compacting[level]
    }
}
