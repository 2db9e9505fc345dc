//! Shared append-only event log.
//!
//! Lines look like `2026-10-16 09:14:03.207 - Process 4121 - became leader.`.
//! The file is opened with `O_APPEND` and every line is handed to the kernel in
//! one `write`, so concurrent writers from several processes never interleave
//! within a line and existing content is never truncated.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::{Error, Result};

#[derive(Debug)]
pub struct EventLog {
    file: Mutex<Option<File>>,
    path: PathBuf,
    pid: u32,
    tag: Option<String>,
    offset: UtcOffset,
}

impl EventLog {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::io_at(path))?;
        Ok(Self::with_file(Some(file), path))
    }

    /// Like [`EventLog::open`], but an unopenable file yields a log whose
    /// events are all skipped instead of an error.
    pub fn open_or_disabled(path: &Path) -> Self {
        Self::open(path).unwrap_or_else(|err| {
            log::warn!("event log disabled: {err}");
            Self::with_file(None, path)
        })
    }

    fn with_file(file: Option<File>, path: &Path) -> Self {
        Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            pid: std::process::id(),
            tag: None,
            // Resolved once: later lookups can fail after threads are started.
            offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        }
    }

    /// Prefixes every message with `(tag) `, used by workers.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event. Failures are reported through `log` and otherwise
    /// ignored: the event log never stops the caller.
    pub fn event(&self, message: impl AsRef<str>) {
        if let Err(err) = self.try_event(message.as_ref()) {
            log::warn!("event log write to {} failed: {err}", self.path.display());
        }
    }

    pub fn try_event(&self, message: &str) -> Result<()> {
        let line = self.format_line(message);
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = match guard.as_mut() {
            Some(file) => file,
            None => return Ok(()),
        };
        file.write_all(line.as_bytes())
            .map_err(Error::io_at(&self.path))?;
        log::debug!("{}", line.trim_end());
        Ok(())
    }

    /// Flushes and closes the file. Later events are dropped.
    pub fn close(&self) {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(file) = guard.take() {
            if let Err(err) = file.sync_data() {
                log::warn!("event log sync failed: {err}");
            }
        }
    }

    fn format_line(&self, message: &str) -> String {
        let stamp = timestamp(self.offset);
        match &self.tag {
            Some(tag) => format!("{stamp} - Process {} - ({tag}) {message}\n", self.pid),
            None => format!("{stamp} - Process {} - {message}\n", self.pid),
        }
    }
}

fn timestamp(offset: UtcOffset) -> String {
    let format =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");
    let now = OffsetDateTime::now_utc().to_offset(offset);
    now.format(format)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
