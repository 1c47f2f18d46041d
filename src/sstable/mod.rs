//! Sorted table files.
//!
//! An SST is an immutable on-disk file holding key-ordered records. The
//! layout, in file order:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Header       : min_key, max_key (length-prefixed)    │
//! ├──────────────────────────────────────────────────────┤
//! │ FilterBlock  : 16-byte handle, then filter payload   │
//! ├──────────────────────────────────────────────────────┤
//! │ Values       : encoded values in key order           │
//! ├──────────────────────────────────────────────────────┤
//! │ IndexBlock   : per value: key, value offset (u64)    │
//! ├──────────────────────────────────────────────────────┤
//! │ Footer       : Handle(values), Handle(index) — 32 B  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! The filter block's leading handle is written as a placeholder and
//! rewritten with the payload's (offset, size) once the payload is on disk.
//! Index offsets are absolute file positions of each encoded value.
//!
//! Readers keep only the metadata in memory — header, filter, index,
//! footer — and fetch values lazily by offset. The value section is read in
//! full only by compaction.

pub mod builder;
pub mod iterator;

pub use builder::TableBuilder;
pub use iterator::{MergeIterator, TableIterator};

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::codec::{self, Handle, Record};
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::id::extract_file_id;

const SST_SUFFIX: &str = "sst";
const LEVEL_SUFFIX: &str = "level";

/// Size in bytes of the encoded [`Footer`].
pub const FOOTER_SIZE: u64 = 32;

/// Directory holding the SSTs of one level: `{sstable_dir}/{level}-level`.
pub fn level_dir(sstable_dir: &Path, level: usize) -> PathBuf {
    sstable_dir.join(format!("{level}-{LEVEL_SUFFIX}"))
}

/// Path of an SST file: `{sstable_dir}/{level}-level/{id}.sst`.
pub fn table_path(sstable_dir: &Path, level: usize, id: u64) -> PathBuf {
    level_dir(sstable_dir, level).join(format!("{id}.{SST_SUFFIX}"))
}

/// Table metadata mirroring the first and last index keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub min_key: Vec<u8>,
    pub max_key: Vec<u8>,
}

impl Header {
    pub fn encode_to<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        codec::encode_key(w, &self.min_key)?;
        codec::encode_key(w, &self.max_key)
    }

    pub fn decode_from<R: Read>(r: &mut R) -> Result<Self> {
        let min_key = codec::decode_key(r).map_err(decode_as("header"))?;
        let max_key = codec::decode_key(r).map_err(decode_as("header"))?;
        Ok(Self { min_key, max_key })
    }
}

/// The last 32 bytes of the file: the value section handle, then the index
/// block handle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Footer {
    pub data: Handle,
    pub index: Handle,
}

impl Footer {
    pub fn encode_to<W: std::io::Write>(&self, w: &mut W) -> Result<()> {
        self.data.encode_to(w)?;
        self.index.encode_to(w)
    }

    pub fn decode_from<R: Read>(r: &mut R) -> Result<Self> {
        let data = Handle::decode_from(r).map_err(decode_as("footer"))?;
        let index = Handle::decode_from(r).map_err(decode_as("footer"))?;
        Ok(Self { data, index })
    }
}

/// One index entry: a key and the absolute file offset of its encoded value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub offset: u64,
}

/// In-memory metadata for one on-disk sorted table. The value section stays
/// on disk; everything else is resident.
#[derive(Debug)]
pub struct SSTable {
    id: u64,
    level: usize,
    path: PathBuf,
    pub header: Header,
    pub filter: Filter,
    pub index: Vec<IndexEntry>,
    pub footer: Footer,
}

impl SSTable {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a table's metadata from disk. Values are not read.
    pub fn decode_from(path: &Path, level: usize) -> Result<Self> {
        let id = extract_file_id(path)
            .ok_or_else(|| Error::decode("table file name", path.display().to_string()))?;

        let mut file = File::open(path).map_err(|e| Error::io("open", e))?;
        let file_len = file.metadata().map_err(|e| Error::io("read", e))?.len();

        let header = Header::decode_from(&mut file)?;

        let filter_handle = Handle::decode_from(&mut file).map_err(decode_as("filter handle"))?;
        if handle_end(&filter_handle).is_none_or(|end| end > file_len) {
            return Err(Error::decode(
                "filter handle",
                format!("range past end of {}", path.display()),
            ));
        }
        file.seek(SeekFrom::Start(filter_handle.offset))
            .map_err(|e| Error::io("read", e))?;
        let mut limited = (&file).take(filter_handle.size);
        let filter = Filter::read_from(&mut limited)?;

        if file_len < FOOTER_SIZE {
            return Err(Error::decode(
                "footer",
                format!("{} is too short for a footer", path.display()),
            ));
        }
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))
            .map_err(|e| Error::io("read", e))?;
        let footer = Footer::decode_from(&mut file)?;
        if handle_end(&footer.data).is_none_or(|end| end > file_len)
            || handle_end(&footer.index).is_none_or(|end| end > file_len)
        {
            return Err(Error::decode(
                "footer",
                format!("handle range past end of {}", path.display()),
            ));
        }

        file.seek(SeekFrom::Start(footer.index.offset))
            .map_err(|e| Error::io("read", e))?;
        let mut buf = vec![0u8; footer.index.size as usize];
        file.read_exact(&mut buf)
            .map_err(|e| Error::decode("index block", e))?;

        let mut cursor = Cursor::new(&buf[..]);
        let mut index = Vec::new();
        while (cursor.position() as usize) < buf.len() {
            let key = codec::decode_key(&mut cursor).map_err(decode_as("index block"))?;
            let offset = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| Error::decode("index block", e))?;
            index.push(IndexEntry { key, offset });
        }

        Ok(Self {
            id,
            level,
            path: path.to_path_buf(),
            header,
            filter,
            index,
            footer,
        })
    }

    /// Whether `key` can possibly be in this table: inside the key range and
    /// reported possible by the filter.
    pub fn may_have(&self, key: &[u8]) -> bool {
        if key < self.header.min_key.as_slice() || key > self.header.max_key.as_slice() {
            return false;
        }
        self.filter.may_contain(key)
    }

    /// Point lookup through the ordered cursor. Tombstones are returned as
    /// their sentinel value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut iter = TableIterator::new(self);
        iter.seek(key);
        match iter.key() {
            Some(found) if found == key => Ok(Some(iter.value()?)),
            _ => Ok(None),
        }
    }

    /// Read one value from disk by its absolute file offset.
    pub fn get_value_by_offset(&self, offset: u64) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path).map_err(|e| Error::io("open", e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| Error::io("read", e))?;
        codec::decode_value(&mut file)
    }

    /// Load the full value section and zip it with the index keys,
    /// producing every record in key order. Used by compaction.
    pub fn read_records(&self) -> Result<Vec<Record>> {
        let mut file = File::open(&self.path).map_err(|e| Error::io("open", e))?;
        file.seek(SeekFrom::Start(self.footer.data.offset))
            .map_err(|e| Error::io("read", e))?;
        let mut buf = vec![0u8; self.footer.data.size as usize];
        file.read_exact(&mut buf)
            .map_err(|e| Error::decode("data block", e))?;

        let mut cursor = Cursor::new(&buf[..]);
        let mut values = Vec::with_capacity(self.index.len());
        while (cursor.position() as usize) < buf.len() {
            values.push(codec::decode_value(&mut cursor).map_err(decode_as("data block"))?);
        }

        if values.len() != self.index.len() {
            return Err(Error::decode(
                "data block",
                format!(
                    "{} values against {} index entries in {}",
                    values.len(),
                    self.index.len(),
                    self.path.display()
                ),
            ));
        }

        Ok(self
            .index
            .iter()
            .zip(values)
            .map(|(entry, value)| Record::new(entry.key.clone(), value))
            .collect())
    }
}

fn handle_end(handle: &Handle) -> Option<u64> {
    handle.offset.checked_add(handle.size)
}

fn decode_as(component: &'static str) -> impl Fn(Error) -> Error {
    move |err| match err {
        Error::Decode { msg, .. } => Error::Decode { component, msg },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TOMBSTONE;
    use tempfile::TempDir;

    fn build_table(dir: &Path, id: u64, level: usize, records: &[(&str, &str)]) -> SSTable {
        let mut builder = TableBuilder::new(id, level);
        for (key, value) in records {
            builder.add(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        }
        builder.finish(dir).expect("failed to build table")
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let records = [
            ("apple", "fruit"),
            ("banana", "fruit"),
            ("carrot", "vegetable"),
            ("daikon", "vegetable"),
        ];
        let written = build_table(dir.path(), 1, 0, &records);

        let read = SSTable::decode_from(written.path(), 0).expect("decode failed");
        assert_eq!(read.id(), 1);
        assert_eq!(read.header, written.header);
        assert_eq!(read.footer, written.footer);
        assert_eq!(read.index, written.index);
        assert_eq!(read.header.min_key, b"apple");
        assert_eq!(read.header.max_key, b"daikon");

        for (key, value) in records {
            let found = read
                .get(key.as_bytes())
                .expect("get failed")
                .expect("key missing");
            assert_eq!(found, value.as_bytes(), "wrong value for {key}");
        }
    }

    #[test]
    fn test_round_trip_preserves_tombstones() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut builder = TableBuilder::new(4, 1);
        builder.add(b"alive".to_vec(), b"yes".to_vec());
        builder.add(b"dead".to_vec(), TOMBSTONE.to_vec());
        let written = builder.finish(dir.path()).expect("failed to build table");

        let read = SSTable::decode_from(written.path(), 1).expect("decode failed");
        let records = read.read_records().expect("read_records failed");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key, b"alive");
        assert!(!records[0].is_tombstone());
        assert_eq!(records[1].key, b"dead");
        assert!(records[1].is_tombstone());
    }

    #[test]
    fn test_get_nonexistent_key() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let table = build_table(dir.path(), 2, 0, &[("b", "1"), ("d", "2")]);

        assert_eq!(table.get(b"a").expect("get failed"), None);
        assert_eq!(table.get(b"c").expect("get failed"), None);
        assert_eq!(table.get(b"e").expect("get failed"), None);
    }

    #[test]
    fn test_may_have_respects_range_and_filter() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let table = build_table(dir.path(), 3, 0, &[("banana", "1"), ("cherry", "2")]);

        assert!(table.may_have(b"banana"));
        assert!(table.may_have(b"cherry"));
        // Outside the key range, regardless of the filter.
        assert!(!table.may_have(b"apple"));
        assert!(!table.may_have(b"zebra"));
    }

    #[test]
    fn test_filter_soundness() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let records: Vec<(String, String)> = (0..200)
            .map(|i| (format!("key_{i:04}"), format!("value_{i:04}")))
            .collect();
        let mut builder = TableBuilder::new(5, 0);
        for (key, value) in &records {
            builder.add(key.as_bytes().to_vec(), value.as_bytes().to_vec());
        }
        let table = builder.finish(dir.path()).expect("failed to build table");

        // may_have == false must imply the key is absent.
        for i in 0..400 {
            let key = format!("key_{i:04}");
            let present = i < 200;
            if !table.may_have(key.as_bytes()) {
                assert!(!present, "filter rejected stored key {key}");
            }
        }
    }

    #[test]
    fn test_read_records_matches_input() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let records = [("a", "1"), ("b", "2"), ("c", "3")];
        let table = build_table(dir.path(), 6, 2, &records);

        let loaded = table.read_records().expect("read_records failed");
        assert_eq!(loaded.len(), 3);
        for (record, (key, value)) in loaded.iter().zip(records) {
            assert_eq!(record.key, key.as_bytes());
            assert_eq!(record.value, value.as_bytes());
        }
    }

    #[test]
    fn test_get_value_by_offset() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let table = build_table(dir.path(), 7, 0, &[("k1", "first"), ("k2", "second")]);

        let value = table
            .get_value_by_offset(table.index[1].offset)
            .expect("read failed");
        assert_eq!(value, b"second");
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let err = SSTable::decode_from(&dir.path().join("42.sst"), 0).unwrap_err();
        assert!(matches!(err, Error::Io { op: "open", .. }));
    }

    #[test]
    fn test_truncated_file_is_decode_error() {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("9.sst");
        std::fs::write(&path, b"\x05\x00\x00").expect("write failed");

        let err = SSTable::decode_from(&path, 0).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }), "got {err:?}");
    }
}
