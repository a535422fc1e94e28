// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Binary record store: a headerless file of 36-byte records, addressed by
// 1-based ordinal. Every operation, reads included, runs under the store
// writer lock, so operations across all connections are totally ordered.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::lock_set::{LockSet, ServerLock};
use crate::record::{Record, RECORD_SIZE};

pub struct RecordStore {
    file: File,
    path: PathBuf,
    locks: Arc<LockSet>,
}

impl RecordStore {
    /// Open the data file, creating it empty if absent.
    pub fn open(path: impl AsRef<Path>, locks: Arc<LockSet>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let len = file.metadata()?.len();
        if len % RECORD_SIZE as u64 != 0 {
            // The torn tail is ignored by count() and overwritten by the next append.
            warn!(path = %path.display(), len, "data file has a partial trailing record");
        }
        debug!(path = %path.display(), records = len / RECORD_SIZE as u64, "opened record store");
        Ok(Self { file, path, locks })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn count_unlocked(&self) -> Result<u32> {
        Ok((self.file.metadata()?.len() / RECORD_SIZE as u64) as u32)
    }

    fn check_ordinal(ordinal: i64, count: u32) -> Result<u64> {
        if ordinal < 1 || ordinal > count as i64 {
            return Err(Error::OrdinalOutOfRange { ordinal, count });
        }
        Ok((ordinal as u64 - 1) * RECORD_SIZE as u64)
    }

    fn read_unlocked(&self, offset: u64) -> Result<Record> {
        let mut buf = [0u8; RECORD_SIZE];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(Record::from_bytes(&buf))
    }

    /// Number of whole records in the file.
    pub fn count(&self) -> Result<u32> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        self.count_unlocked()
    }

    /// Append `record`, returning its ordinal.
    pub fn append(&self, record: &Record) -> Result<u32> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        let count = self.count_unlocked()?;
        self.file
            .write_all_at(&record.to_bytes(), count as u64 * RECORD_SIZE as u64)?;
        debug!(ordinal = count + 1, "appended record");
        Ok(count + 1)
    }

    /// Read the record at `ordinal`. Ordinals outside `1..=count()` are rejected.
    pub fn read_at(&self, ordinal: i64) -> Result<Record> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        let offset = Self::check_ordinal(ordinal, self.count_unlocked()?)?;
        self.read_unlocked(offset)
    }

    /// Replace the record at `ordinal` in place.
    pub fn overwrite_at(&self, ordinal: i64, record: &Record) -> Result<()> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        let offset = Self::check_ordinal(ordinal, self.count_unlocked()?)?;
        self.file.write_all_at(&record.to_bytes(), offset)?;
        debug!(ordinal, "overwrote record");
        Ok(())
    }

    /// Every record in ascending ordinal order, read in one locked pass.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        let count = self.count_unlocked()?;
        (0..count as u64)
            .map(|i| self.read_unlocked(i * RECORD_SIZE as u64))
            .collect()
    }

    /// Flush file contents to disk.
    pub fn sync(&self) -> Result<()> {
        let _guard = self.locks.lock(ServerLock::StoreWriter)?;
        self.file.sync_data()?;
        Ok(())
    }
}
