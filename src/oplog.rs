// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Append-only operation log: a newline-delimited text file guarded by one
// lock of a lock set. The server keeps one, and all clients of one user on
// a host share another.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::lock_set::{LockId, LockSet};

pub struct OpLog {
    path: PathBuf,
    locks: Arc<LockSet>,
    lock: usize,
}

impl OpLog {
    /// Bind a log file to `lock` of `locks`. The file is created if absent.
    pub fn open(path: impl AsRef<Path>, locks: Arc<LockSet>, lock: impl LockId) -> Result<Self> {
        let log = Self {
            path: path.as_ref().to_path_buf(),
            locks,
            lock: lock.index(),
        };
        {
            let _guard = log.locks.lock(log.lock)?;
            log.open_append()?;
        }
        Ok(log)
    }

    fn open_append(&self) -> Result<File> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Embedded newlines are flattened to spaces so one
    /// call always adds exactly one line.
    pub fn append_line(&self, text: &str) -> Result<()> {
        let line = text.replace(['\n', '\r'], " ");
        let _guard = self.locks.lock(self.lock)?;
        let mut file = self.open_append()?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    /// Every line of the log in append order.
    pub fn read_all_lines(&self) -> Result<Vec<String>> {
        let _guard = self.locks.lock(self.lock)?;
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let lines = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()?;
        debug!(path = %self.path.display(), lines = lines.len(), "read log");
        Ok(lines)
    }

    /// Number of lines, from its own locked pass.
    pub fn line_count(&self) -> Result<usize> {
        Ok(self.read_all_lines()?.len())
    }
}
