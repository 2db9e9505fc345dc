//! File-backed shared counter.
//!
//! Each `load`/`save` opens the file, holds `LOCK_EX` for that single I/O and
//! closes it again. A `load` followed by a `save` is two critical sections, so
//! concurrent read-modify-write cycles from different processes can interleave
//! and the last writer wins.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::lock::FileLock;
use crate::{Error, Result};

/// Value reported when no valid counter has been persisted yet.
pub const DEFAULT_COUNTER: i64 = 32;

const MAX_RECORD: u64 = 128;

#[derive(Debug, Clone)]
pub struct CounterStore {
    path: PathBuf,
}

impl CounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the counter, falling back to [`DEFAULT_COUNTER`] when the file is
    /// missing, unreadable or does not hold an integer.
    pub fn load(&self) -> i64 {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => DEFAULT_COUNTER,
            Err(err) => {
                log::warn!("counter load failed, using default: {err}");
                DEFAULT_COUNTER
            }
        }
    }

    /// Reads the counter. `Ok(None)` means absent or unparsable.
    pub fn try_load(&self) -> Result<Option<i64>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Error::io_at(&self.path)(err)),
        };
        let lock = FileLock::lock_blocking(file, &self.path)?;
        let mut contents = String::new();
        lock.file()
            .take(MAX_RECORD)
            .read_to_string(&mut contents)
            .map_err(Error::io_at(&self.path))?;
        Ok(parse_record(&contents))
    }

    pub fn save(&self, value: i64) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(Error::io_at(&self.path))?;
        // Truncate only once the lock is held so readers never see an empty file.
        let lock = FileLock::lock_blocking(file, &self.path)?;
        let mut handle = lock.file();
        handle.set_len(0).map_err(Error::io_at(&self.path))?;
        handle
            .seek(SeekFrom::Start(0))
            .map_err(Error::io_at(&self.path))?;
        handle
            .write_all(value.to_string().as_bytes())
            .map_err(Error::io_at(&self.path))?;
        handle.flush().map_err(Error::io_at(&self.path))?;
        Ok(())
    }

    /// Applies `f` to the current value and stores the result.
    ///
    /// Not atomic across processes: the load and the save lock separately.
    pub fn update(&self, f: impl FnOnce(i64) -> i64) -> Result<i64> {
        let next = f(self.load());
        self.save(next)?;
        Ok(next)
    }
}

fn parse_record(contents: &str) -> Option<i64> {
    contents.split_whitespace().next()?.parse::<i64>().ok()
}
