//! SST construction.
//!
//! A [`TableBuilder`] accumulates records in key order — from a frozen
//! memtable or from a compaction merge — and writes them out as one table
//! file. Compaction checks [`TableBuilder::should_flush`] after every record
//! to split its output at the configured table size.

use std::fs::{self, File};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::codec::{self, Handle, Record};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::sstable::{table_path, Footer, Header, IndexEntry, SSTable};

/// Builds one SST file from records added in key order.
pub struct TableBuilder {
    id: u64,
    level: usize,
    records: Vec<Record>,
    filter: Filter,
    size_estimate: u64,
}

impl TableBuilder {
    pub fn new(id: u64, level: usize) -> Self {
        Self {
            id,
            level,
            records: Vec::new(),
            filter: Filter::default(),
            size_estimate: 0,
        }
    }

    /// Append a record. Keys must arrive in strictly increasing order.
    pub fn add(&mut self, key: Vec<u8>, value: Vec<u8>) {
        debug_assert!(
            self.records.last().map_or(true, |last| last.key < key),
            "keys must be added in strictly increasing order"
        );
        self.filter.add(&key);
        // Encoded value plus the index entry it costs.
        self.size_estimate += (4 + key.len() + 4 + value.len() + 8) as u64;
        self.records.push(Record::new(key, value));
    }

    /// Whether the accumulated records reach the split size.
    pub fn should_flush(&self, max_sst_bytes: u64) -> bool {
        self.size_estimate >= max_sst_bytes
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write the table file under `sstable_dir` and return its resident
    /// metadata. A partially written file is removed on failure.
    pub fn finish(self, sstable_dir: &Path) -> Result<SSTable> {
        if self.records.is_empty() {
            return Err(Error::InvalidInput(
                "cannot build an empty table".to_string(),
            ));
        }

        let path = table_path(sstable_dir, self.level, self.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io("mkdir", e))?;
        }

        match Self::encode_to(&path, &self.records, &self.filter) {
            Ok((header, index, footer)) => Ok(SSTable {
                id: self.id,
                level: self.level,
                path,
                header,
                filter: self.filter,
                index,
                footer,
            }),
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(err)
            }
        }
    }

    fn encode_to(
        path: &PathBuf,
        records: &[Record],
        filter: &Filter,
    ) -> Result<(Header, Vec<IndexEntry>, Footer)> {
        let mut file = File::create(path).map_err(|e| Error::io("open", e))?;

        let header = Header {
            min_key: records.first().unwrap().key.clone(),
            max_key: records.last().unwrap().key.clone(),
        };
        header.encode_to(&mut file)?;

        // Filter block: reserve the meta handle, write the payload, then
        // backpatch the handle with the payload's location.
        let meta_pos = position(&mut file)?;
        Handle::default().encode_to(&mut file)?;
        let payload_start = position(&mut file)?;
        filter.write_to(&mut file)?;
        let payload_end = position(&mut file)?;
        file.seek(SeekFrom::Start(meta_pos))
            .map_err(|e| Error::io("write", e))?;
        Handle::new(payload_start, payload_end - payload_start).encode_to(&mut file)?;
        file.seek(SeekFrom::Start(payload_end))
            .map_err(|e| Error::io("write", e))?;

        // Value section; each index entry records its value's file offset.
        let data_start = payload_end;
        let mut index = Vec::with_capacity(records.len());
        for record in records {
            let offset = position(&mut file)?;
            codec::encode_value(&mut file, &record.value)?;
            index.push(IndexEntry {
                key: record.key.clone(),
                offset,
            });
        }

        let index_start = position(&mut file)?;
        for entry in &index {
            codec::encode_key(&mut file, &entry.key)?;
            file.write_u64::<LittleEndian>(entry.offset)
                .map_err(|e| Error::io("write", e))?;
        }
        let index_end = position(&mut file)?;

        let footer = Footer {
            data: Handle::new(data_start, index_start - data_start),
            index: Handle::new(index_start, index_end - index_start),
        };
        footer.encode_to(&mut file)?;

        file.flush().map_err(|e| Error::io("write", e))?;
        file.sync_all().map_err(|e| Error::io("sync", e))?;
        Ok((header, index, footer))
    }
}

fn position(file: &mut File) -> Result<u64> {
    file.stream_position().map_err(|e| Error::io("write", e))
}
