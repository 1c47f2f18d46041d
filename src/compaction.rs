//! Compaction: merging tables downward to reclaim space, resolve key
//! shadows, and keep every level inside its capacity.
//!
//! Level 0 is compacted synchronously on the writer path as soon as it
//! exceeds its cap: every level-0 table plus the overlapping slice of
//! level 1 is merged and the result written back to level 1. Deeper levels
//! compact on a background worker thread, taking only the oldest surplus
//! tables plus the overlap below them. One worker follows the overflow
//! down the tree until every level is back inside its cap.
//!
//! A compaction claims its source and target levels via the level manager's
//! `compacting` flags, merges with [`MergeIterator`] (freshest source
//! wins), splits the output at `max_sst_bytes`, and commits by registering
//! the new tables before unregistering and unlinking the inputs. Inputs are
//! only removed after every output is durable, so a failed attempt leaves
//! the tree exactly as it was; the error is logged and the next trigger
//! retries.
//!
//! Tombstones ride along like ordinary records and are dropped only when
//! the target is the bottom level, where nothing older can remain beneath
//! them.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};
use crate::level::LevelManager;
use crate::sstable::{MergeIterator, SSTable, TableBuilder};

/// Writer-path trigger: runs the synchronous level-0 compaction when level 0
/// is over its cap, then schedules the background worker if the overflow
/// reached level 1. Failures are logged and retried on the next trigger.
pub fn maybe_compact(levels: &Arc<LevelManager>) {
    let config = levels.config().clone();
    if levels.table_count(0) <= config.level_cap(0) {
        return;
    }

    levels.begin_compaction(0);
    let result = compact_into_next(levels, 0);
    levels.end_compaction(0);

    if let Err(err) = result {
        tracing::error!(level = 0, error = %err, "level-0 compaction failed; inputs left intact");
        return;
    }

    if config.levels_max >= 2
        && levels.table_count(1) > config.level_cap(1)
    {
        spawn_worker(levels.clone(), 1);
    }
}

/// Start a background worker compacting `start` and following the overflow
/// downward. One worker per level at a time; the claim happens inside.
pub(crate) fn spawn_worker(levels: Arc<LevelManager>, start: usize) {
    thread::spawn(move || worker(levels, start));
}

fn worker(levels: Arc<LevelManager>, start: usize) {
    let config = levels.config().clone();
    let mut level = start;
    loop {
        levels.begin_compaction(level);
        let result = compact_into_next(&levels, level);
        levels.end_compaction(level);

        if let Err(err) = result {
            tracing::error!(level, error = %err, "async compaction failed; inputs left intact");
            return;
        }

        // Stay on this level while it is still over cap, otherwise follow
        // the overflow down.
        if levels.table_count(level) > config.level_cap(level) {
            continue;
        }
        let next = level + 1;
        if next < config.levels_max && levels.table_count(next) > config.level_cap(next) {
            level = next;
            continue;
        }
        return;
    }
}

/// Merge one level's surplus into the level below. The caller holds the
/// compaction claim for `level` and `level + 1`.
fn compact_into_next(levels: &Arc<LevelManager>, level: usize) -> Result<()> {
    let config = levels.config().clone();
    let target = level + 1;
    debug_assert!(target <= config.levels_max);

    // Selection: all of level 0, or the oldest surplus of a deeper level
    // (ties broken by smallest min-key), plus the overlapping slice of the
    // target level.
    let snapshot = levels.tables_at(level);
    if snapshot.is_empty() {
        return Ok(());
    }
    let inputs: Vec<Arc<SSTable>> = if level == 0 {
        snapshot
    } else {
        let cap = config.level_cap(level);
        if snapshot.len() <= cap {
            return Ok(());
        }
        let surplus = snapshot.len() - cap;
        let mut by_age = snapshot;
        by_age.sort_by(|a, b| {
            a.id()
                .cmp(&b.id())
                .then_with(|| a.header.min_key.cmp(&b.header.min_key))
        });
        by_age.truncate(surplus);
        by_age
    };

    let min_key = inputs.iter().map(|t| &t.header.min_key).min().unwrap().clone();
    let max_key = inputs.iter().map(|t| &t.header.max_key).max().unwrap().clone();
    let overlaps: Vec<Arc<SSTable>> = levels
        .tables_at(target)
        .into_iter()
        .filter(|t| t.header.min_key <= max_key && min_key <= t.header.max_key)
        .collect();

    tracing::info!(
        level,
        target,
        inputs = inputs.len(),
        overlaps = overlaps.len(),
        "starting compaction"
    );

    // Load every selected table in full, freshest source first: the source
    // level beats the target level, larger ids beat smaller within each.
    let mut sources: Vec<&Arc<SSTable>> = Vec::with_capacity(inputs.len() + overlaps.len());
    for group in [&inputs, &overlaps] {
        let mut tables: Vec<&Arc<SSTable>> = group.iter().collect();
        tables.sort_by(|a, b| b.id().cmp(&a.id()));
        sources.extend(tables);
    }
    let mut streams = Vec::with_capacity(sources.len());
    for table in &sources {
        streams.push(table.read_records()?);
    }

    // Merge, dedup, and split the output at the table size cap. Tombstones
    // survive unless this output lands on the bottom level.
    let drop_tombstones = target == config.levels_max;
    let sstable_dir = config.sstable_dir();
    let mut new_tables: Vec<SSTable> = Vec::new();
    let mut builder = TableBuilder::new(levels.ids().next(), target);
    let mut failure: Option<Error> = None;

    for record in MergeIterator::new(streams) {
        if drop_tombstones && record.is_tombstone() {
            continue;
        }
        builder.add(record.key, record.value);
        if builder.should_flush(config.max_sst_bytes) {
            let full = std::mem::replace(
                &mut builder,
                TableBuilder::new(levels.ids().next(), target),
            );
            match full.finish(&sstable_dir) {
                Ok(table) => new_tables.push(table),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }
    }
    if failure.is_none() && !builder.is_empty() {
        match builder.finish(&sstable_dir) {
            Ok(table) => new_tables.push(table),
            Err(err) => failure = Some(err),
        }
    }
    if let Some(err) = failure {
        // Abort: drop whatever outputs made it to disk and leave every
        // input registered.
        for table in &new_tables {
            let _ = fs::remove_file(table.path());
        }
        return Err(err);
    }

    // Commit: new tables become visible before the inputs disappear, so a
    // reader always sees at least one copy of every record.
    let old_inputs: Vec<PathBuf> = inputs.iter().map(|t| t.path().to_path_buf()).collect();
    let old_overlaps: Vec<PathBuf> = overlaps.iter().map(|t| t.path().to_path_buf()).collect();
    let produced = new_tables.len();
    levels.add_new_ssts(new_tables);
    levels.remove_old_ssts(&old_inputs, level);
    levels.remove_old_ssts(&old_overlaps, target);

    tracing::info!(level, target, produced, "compaction complete");
    Ok(())
}
