use std::path::PathBuf;

const WAL_DIRECTORY: &str = "wal";
const SSTABLE_DIRECTORY: &str = "sstable";

/// Configuration for a [`Database`](crate::Database).
///
/// Read once at startup into this immutable struct and passed explicitly;
/// nothing re-reads configuration while the store is running.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for the store.
    pub root_path: PathBuf,

    /// Override for the WAL directory (default: `{root}/wal`).
    pub wal_path: Option<PathBuf>,

    /// Override for the SST directory (default: `{root}/sstable`).
    pub sstable_path: Option<PathBuf>,

    /// Memtable size that triggers promotion to the frozen queue
    /// (default: 2 MiB).
    pub max_memtable_bytes: u64,

    /// Split size for SSTs produced by compaction (default: 2 MiB).
    pub max_sst_bytes: u64,

    /// Frozen queue length that triggers eviction to level 0 (default: 10).
    pub max_frozen: usize,

    /// Deepest level (default: 6).
    pub levels_max: usize,

    /// Base of the per-level capacity `base^(level + 2)` (default: 2).
    pub level_size_base: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            wal_path: None,
            sstable_path: None,
            max_memtable_bytes: 2 * 1024 * 1024,
            max_sst_bytes: 2 * 1024 * 1024,
            max_frozen: 10,
            levels_max: 6,
            level_size_base: 2,
        }
    }
}

impl Config {
    /// Create a new config rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root.into(),
            ..Default::default()
        }
    }

    /// Override the WAL directory.
    pub fn wal_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.wal_path = Some(path.into());
        self
    }

    /// Override the SST directory.
    pub fn sstable_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.sstable_path = Some(path.into());
        self
    }

    /// Set the memtable promotion threshold.
    pub fn max_memtable_bytes(mut self, bytes: u64) -> Self {
        self.max_memtable_bytes = bytes;
        self
    }

    /// Set the compaction split size.
    pub fn max_sst_bytes(mut self, bytes: u64) -> Self {
        self.max_sst_bytes = bytes;
        self
    }

    /// Set the frozen queue cap.
    pub fn max_frozen(mut self, count: usize) -> Self {
        self.max_frozen = count;
        self
    }

    /// Set the deepest level.
    pub fn levels_max(mut self, level: usize) -> Self {
        self.levels_max = level;
        self
    }

    /// Set the capacity base.
    pub fn level_size_base(mut self, base: usize) -> Self {
        self.level_size_base = base;
        self
    }

    /// Directory holding one WAL file per memtable.
    pub fn wal_dir(&self) -> PathBuf {
        self.wal_path
            .clone()
            .unwrap_or_else(|| self.root_path.join(WAL_DIRECTORY))
    }

    /// Directory holding the per-level SST subdirectories.
    pub fn sstable_dir(&self) -> PathBuf {
        self.sstable_path
            .clone()
            .unwrap_or_else(|| self.root_path.join(SSTABLE_DIRECTORY))
    }

    /// Number of tables level `level` may hold before compaction triggers.
    pub fn level_cap(&self, level: usize) -> usize {
        self.level_size_base.pow(level as u32 + 2)
    }
}
