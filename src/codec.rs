//! Length-prefixed binary encoding for keys, values, and records, plus the
//! fixed-width block handle used by the SST format.
//!
//! Every multi-byte integer on disk is little-endian. A key or value is a
//! 4-byte length prefix followed by the raw bytes:
//!
//! ```text
//! ┌────────────┬──────────┬──────────────┬────────────┐
//! │ key length │ key data │ value length │ value data │
//! └────────────┴──────────┴──────────────┴────────────┘
//! ```
//!
//! A deleted key is stored as a record whose value is the reserved
//! [`TOMBSTONE`] sentinel, uniformly across the WAL, the memtables, and the
//! SSTs. There are no per-block checksums.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};

/// Keys are bounded at 1 MiB.
pub const MAX_KEY_BYTES: usize = 1 << 20;

/// Values are bounded at 1 GiB.
pub const MAX_VALUE_BYTES: usize = 1 << 30;

/// Reserved value marking a deleted key.
pub const TOMBSTONE: &[u8] = b"\x7eDELETED\x7e";

/// Size in bytes of an encoded [`Handle`].
pub const HANDLE_SIZE: u64 = 16;

/// Returns true if the stored value is the tombstone sentinel.
pub fn is_tombstone(value: &[u8]) -> bool {
    value == TOMBSTONE
}

/// A single key-value entry. Tombstones are ordinary records carrying the
/// sentinel value, so they flow through the WAL, the memtables, and
/// compaction like any other write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn tombstone(key: Vec<u8>) -> Self {
        Self {
            key,
            value: TOMBSTONE.to_vec(),
        }
    }

    pub fn is_tombstone(&self) -> bool {
        is_tombstone(&self.value)
    }

    /// Approximate encoded size, ignoring allocator overhead.
    pub fn estimated_size(&self) -> u64 {
        (4 + self.key.len() + 4 + self.value.len() + 1) as u64
    }
}

pub fn encode_key<W: Write>(w: &mut W, key: &[u8]) -> Result<()> {
    w.write_u32::<LittleEndian>(key.len() as u32)
        .map_err(|e| Error::io("write", e))?;
    w.write_all(key).map_err(|e| Error::io("write", e))
}

pub fn decode_key<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::decode("key length", e))? as usize;
    if len > MAX_KEY_BYTES {
        return Err(Error::decode(
            "key length",
            format!("{len} exceeds the {MAX_KEY_BYTES} byte bound"),
        ));
    }
    let mut key = vec![0u8; len];
    r.read_exact(&mut key).map_err(|e| Error::decode("key", e))?;
    Ok(key)
}

pub fn encode_value<W: Write>(w: &mut W, value: &[u8]) -> Result<()> {
    w.write_u32::<LittleEndian>(value.len() as u32)
        .map_err(|e| Error::io("write", e))?;
    w.write_all(value).map_err(|e| Error::io("write", e))
}

pub fn decode_value<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r
        .read_u32::<LittleEndian>()
        .map_err(|e| Error::decode("value length", e))? as usize;
    if len > MAX_VALUE_BYTES {
        return Err(Error::decode(
            "value length",
            format!("{len} exceeds the {MAX_VALUE_BYTES} byte bound"),
        ));
    }
    let mut value = vec![0u8; len];
    r.read_exact(&mut value)
        .map_err(|e| Error::decode("value", e))?;
    Ok(value)
}

pub fn encode_record<W: Write>(w: &mut W, record: &Record) -> Result<()> {
    encode_key(w, &record.key)?;
    encode_value(w, &record.value)
}

pub fn decode_record<R: Read>(r: &mut R) -> Result<Record> {
    let key = decode_key(r)?;
    let value = decode_value(r)?;
    Ok(Record { key, value })
}

/// Location of a byte range within an SST file: offset then size, both
/// u64 little-endian, 16 bytes fixed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Handle {
    pub offset: u64,
    pub size: u64,
}

impl Handle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_u64::<LittleEndian>(self.offset)
            .map_err(|e| Error::io("write", e))?;
        w.write_u64::<LittleEndian>(self.size)
            .map_err(|e| Error::io("write", e))
    }

    pub fn decode_from<R: Read>(r: &mut R) -> Result<Self> {
        let offset = r
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::decode("handle", e))?;
        let size = r
            .read_u64::<LittleEndian>()
            .map_err(|e| Error::decode("handle", e))?;
        Ok(Self { offset, size })
    }
}
