//! Ordered cursors over sorted tables and the k-way merge used by
//! compaction.
//!
//! [`TableIterator`] walks one table's resident index in key order, fetching
//! values from disk only when asked. [`MergeIterator`] merges several
//! key-ordered record streams with a min-heap, deduplicating each key in
//! favor of the freshest source:
//!
//! ```text
//! Sources:  [a, d, g, ...]  [b, e, h, ...]  [c, f, i, ...]
//!               ↓               ↓               ↓
//! Heap:     [   a,              b,              c     ]
//!               ↓ (pop minimum)
//! Output:       a
//! ```
//!
//! Sources are ordered newest first; when the same key heads several
//! streams, the entry from the lowest source index pops first and the rest
//! are dropped as duplicates. Tombstones are records like any other and win
//! or lose by the same rule.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::codec::Record;
use crate::error::{Error, Result};
use crate::sstable::SSTable;

/// A forward cursor over one table. Keys come from the in-memory index;
/// values are fetched lazily by file offset.
pub struct TableIterator<'a> {
    table: &'a SSTable,
    pos: usize,
}

impl<'a> TableIterator<'a> {
    pub fn new(table: &'a SSTable) -> Self {
        Self { table, pos: 0 }
    }

    /// Position the cursor at the first entry with key >= `target`.
    pub fn seek(&mut self, target: &[u8]) {
        self.pos = self
            .table
            .index
            .partition_point(|entry| entry.key.as_slice() < target);
    }

    pub fn valid(&self) -> bool {
        self.pos < self.table.index.len()
    }

    /// The current key, or None when the cursor is exhausted.
    pub fn key(&self) -> Option<&'a [u8]> {
        self.table.index.get(self.pos).map(|e| e.key.as_slice())
    }

    /// Fetch the current value from disk.
    pub fn value(&self) -> Result<Vec<u8>> {
        let entry = self.table.index.get(self.pos).ok_or_else(|| {
            Error::decode("index block", "cursor read past the last entry")
        })?;
        self.table.get_value_by_offset(entry.offset)
    }

    pub fn next(&mut self) {
        self.pos += 1;
    }
}

struct HeapEntry {
    record: Record,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed on both fields: BinaryHeap is a max-heap, and the merge
        // wants the smallest key first with the freshest source winning
        // ties.
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges key-ordered record streams into one deduplicated stream.
/// Stream 0 is the freshest source; its records shadow later streams.
pub struct MergeIterator {
    sources: Vec<std::vec::IntoIter<Record>>,
    heap: BinaryHeap<HeapEntry>,
    last_key: Option<Vec<u8>>,
}

impl MergeIterator {
    pub fn new(streams: Vec<Vec<Record>>) -> Self {
        let mut sources: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
        let mut heap = BinaryHeap::new();
        for (source, stream) in sources.iter_mut().enumerate() {
            if let Some(record) = stream.next() {
                heap.push(HeapEntry { record, source });
            }
        }
        Self {
            sources,
            heap,
            last_key: None,
        }
    }

    fn refill(&mut self, source: usize) {
        if let Some(record) = self.sources[source].next() {
            self.heap.push(HeapEntry { record, source });
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while let Some(entry) = self.heap.pop() {
            self.refill(entry.source);
            // A key equal to the last yielded one is a shadowed duplicate
            // from an older source.
            if self.last_key.as_deref() == Some(entry.record.key.as_slice()) {
                continue;
            }
            self.last_key = Some(entry.record.key.clone());
            return Some(entry.record);
        }
        None
    }
}
