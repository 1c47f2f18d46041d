//! StrataDB is a persistent ordered key-value store built on the
//! Log-Structured Merge-tree discipline.
//!
//! Writes are absorbed by an in-memory sorted table (the memtable) backed by
//! a per-table write-ahead log. Full memtables are frozen, queued, and
//! eventually materialized as immutable sorted table files (SSTs) on disk,
//! organized into levels of exponentially growing capacity:
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐
//! │ Active memtable │───▶│ Frozen memtables │
//! │   (skip list)   │    │     (queue)      │
//! └─────────────────┘    └──────────────────┘
//!          │                      │ eviction
//!          ▼                      ▼
//!     ┌─────────┐          ┌─────────────┐
//!     │ WAL file│          │   Level 0   │  overlapping tables
//!     └─────────┘          └─────────────┘
//!                                 │ compaction
//!                                 ▼
//!                          ┌─────────────┐
//!                          │   Level 1   │  disjoint tables
//!                          └─────────────┘
//!                                 │
//!                                 ▼
//!                                ...
//! ```
//!
//! Reads consult the active memtable, then the frozen queue newest-first,
//! then level 0 newest-first, then the deeper levels. Deletes insert a
//! tombstone record that shadows older versions of the key until compaction
//! carries it to the bottom level.
//!
//! The public surface is [`Database`] (`open`/`get`/`put`/`delete`/`recover`)
//! together with the [`Config`] builder and the crate-wide [`Error`] type.

pub mod codec;
pub mod compaction;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod id;
pub mod level;
pub mod memtable;
pub mod sstable;
pub mod wal;

pub use config::Config;
pub use db::{Database, Stats};
pub use error::{Error, Result};
