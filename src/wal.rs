//! Write-ahead logging.
//!
//! Each memtable owns one append-only WAL file at `{wal_dir}/{id}.wal`,
//! written by exactly one writer. A record is appended before it is inserted
//! into the memtable, so every acknowledged write is recoverable by replay.
//! The file is deleted once its memtable has been materialized as an SST.
//!
//! The file is a plain sequence of records in the record codec; there is no
//! header. Replay streams records until end of file, and a partial trailing
//! record is a fatal decode error naming the file and offset.

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::codec::{self, Record};
use crate::error::{Error, Result};

const WAL_SUFFIX: &str = "wal";

/// Path of the WAL file for the memtable with the given id.
pub fn wal_file_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.{WAL_SUFFIX}"))
}

/// A per-memtable append-only log.
#[derive(Debug)]
pub struct Wal {
    file: File,
    path: PathBuf,
}

impl Wal {
    /// Create the WAL file for a fresh memtable.
    pub fn create(dir: &Path, id: u64) -> Result<Self> {
        Self::open(&wal_file_path(dir, id))
    }

    /// Open an existing WAL file for further appends.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::io("open", e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record. Returns once the bytes have reached the kernel;
    /// call [`Wal::sync`] to force them to disk.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let mut buf = Vec::with_capacity(record.estimated_size() as usize);
        codec::encode_record(&mut buf, record)?;
        self.file
            .write_all(&buf)
            .map_err(|e| Error::io("write", e))
    }

    /// Force all appended records to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all().map_err(|e| Error::io("sync", e))
    }

    /// Remove the WAL file. Called after the owning memtable's contents are
    /// durable in an SST.
    pub fn delete(self) -> Result<()> {
        fs::remove_file(&self.path).map_err(|e| Error::io("unlink", e))
    }

    /// Stream every record in the file at `path` to `cb`, in append order.
    pub fn replay<F: FnMut(Record)>(path: &Path, mut cb: F) -> Result<()> {
        let raw = fs::read(path).map_err(|e| Error::io("read", e))?;
        let len = raw.len() as u64;
        let mut cursor = Cursor::new(raw);
        while cursor.position() < len {
            let offset = cursor.position();
            let record = codec::decode_record(&mut cursor).map_err(|e| {
                Error::decode(
                    "wal record",
                    format!("{e} at offset {offset} in {}", path.display()),
                )
            })?;
            cb(record);
        }
        Ok(())
    }
}
