use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide monotonic id generator shared by memtables and SSTs.
///
/// Ids are strictly increasing across a process lifetime. Recovery calls
/// [`IdGenerator::advance_past`] with the largest id found on disk before
/// any new allocation, so fresh ids never collide with persisted files.
#[derive(Debug, Default)]
pub struct IdGenerator(AtomicU64);

impl IdGenerator {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocate the next id. The first allocation returns 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Ensure the next allocation exceeds `seen`.
    pub fn advance_past(&self, seen: u64) {
        self.0.fetch_max(seen, Ordering::SeqCst);
    }
}

/// Parse the numeric id out of a `{id}.wal` or `{id}.sst` file name.
pub fn extract_file_id(path: &Path) -> Option<u64> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse().ok())
}
