//! Advisory `flock(2)` locks.
//!
//! A [`FileLock`] owns an open descriptor holding `LOCK_EX` on a file. The lock
//! is released when the guard is dropped, or by the kernel when the process
//! exits. Locks are bound to the open file description, so two opens of the
//! same path inside one process contend exactly like two processes would.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Attempts to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another descriptor already holds it. Errors are
    /// reserved for failures to create or open the file.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_rw(path)?;
        if flock(&file, path, libc::LOCK_EX | libc::LOCK_NB)? {
            Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            }))
        } else {
            Ok(None)
        }
    }

    /// Opens (creating if needed) and waits until the lock is granted.
    pub fn acquire_blocking(path: &Path) -> Result<Self> {
        let file = open_rw(path)?;
        Self::lock_blocking(file, path)
    }

    /// Waits for the lock on an already opened file.
    pub fn lock_blocking(file: File, path: &Path) -> Result<Self> {
        flock(&file, path, libc::LOCK_EX)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn release(self) {
        drop(self);
    }

    /// Records the current process as the holder of this lock.
    pub fn write_owner_record(&self) -> Result<()> {
        let (pid, start_time) = lock_identity()?;
        let record = format!("{pid} {start_time}\n");
        let mut handle = &self.file;
        handle.set_len(0).map_err(Error::io_at(&self.path))?;
        handle
            .seek(SeekFrom::Start(0))
            .map_err(Error::io_at(&self.path))?;
        handle
            .write_all(record.as_bytes())
            .map_err(Error::io_at(&self.path))?;
        handle.sync_all().map_err(Error::io_at(&self.path))?;
        Ok(())
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn open_rw(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(Error::io_at(path))
}

/// Applies `operation` to `file`, restarting after signals.
///
/// Returns `Ok(false)` only for a non-blocking request the holder refused.
fn flock(file: &File, path: &Path, operation: libc::c_int) -> Result<bool> {
    while unsafe { libc::flock(file.as_raw_fd(), operation) } != 0 {
        let source = std::io::Error::last_os_error();
        match source.kind() {
            ErrorKind::Interrupted => continue,
            ErrorKind::WouldBlock if operation & libc::LOCK_NB != 0 => return Ok(false),
            _ => {
                return Err(Error::Lock {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
    Ok(true)
}

/// Identity recorded in a leader lock file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderInfo {
    pub pid: u32,
    pub start_time: u64,
}

/// Reads the owner record of a lock file, if one has been written.
pub fn read_leader_info(path: &Path) -> Result<Option<LeaderInfo>> {
    let mut contents = String::new();
    match File::open(path) {
        Ok(mut file) => {
            file.read_to_string(&mut contents)
                .map_err(Error::io_at(path))?;
        }
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(Error::io_at(path)(err)),
    }
    let mut parts = contents.split_whitespace();
    let pid = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(0);
    let start_time = parts.next().and_then(|p| p.parse::<u64>().ok()).unwrap_or(0);
    if pid == 0 {
        return Ok(None);
    }
    Ok(Some(LeaderInfo { pid, start_time }))
}

/// True when the recorded owner is still the same running process.
pub fn leader_alive(path: &Path) -> Result<bool> {
    match read_leader_info(path)? {
        Some(info) => owner_alive(&info),
        None => Ok(false),
    }
}

#[cfg(target_os = "linux")]
fn owner_alive(info: &LeaderInfo) -> Result<bool> {
    match proc_start_time(info.pid) {
        Ok(start) => Ok(start == info.start_time),
        Err(Error::IoAt { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(not(target_os = "linux"))]
fn owner_alive(info: &LeaderInfo) -> Result<bool> {
    let res = unsafe { libc::kill(info.pid as libc::pid_t, 0) };
    Ok(res == 0)
}

#[cfg(target_os = "linux")]
fn lock_identity() -> Result<(u32, u64)> {
    let pid = std::process::id();
    let start_time = proc_start_time(pid)?;
    Ok((pid, start_time))
}

#[cfg(not(target_os = "linux"))]
fn lock_identity() -> Result<(u32, u64)> {
    Ok((std::process::id(), 0))
}

#[cfg(target_os = "linux")]
fn proc_start_time(pid: u32) -> Result<u64> {
    let path = PathBuf::from(format!("/proc/{pid}/stat"));
    let stat = std::fs::read_to_string(&path).map_err(Error::io_at(&path))?;
    // The command name may hold spaces or parens; fields resume after the last ')'.
    let (_, fields) = stat
        .rsplit_once(')')
        .ok_or(Error::CorruptMetadata("proc stat without command"))?;
    // Field 3 (state) comes first here, so starttime (field 22) is the 20th.
    fields
        .split_whitespace()
        .nth(19)
        .and_then(|ticks| ticks.parse::<u64>().ok())
        .ok_or(Error::CorruptMetadata("proc stat starttime"))
}
