//! Paths and timing for controllers and workers.
//!
//! Every file is a sibling of the event log:
//!
//! ```text
//! {log}            ← append-only event log
//! {log}.leader     ← leadership lock + owner record
//! {log}.counter    ← persisted counter
//! ```

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const LEADER_SUFFIX: &str = ".leader";
pub const COUNTER_SUFFIX: &str = ".counter";

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_millis(300);
pub const DEFAULT_STATUS: Duration = Duration::from_secs(1);
pub const DEFAULT_RESPAWN: Duration = Duration::from_secs(3);
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub log: PathBuf,
    pub leader: PathBuf,
    pub counter: PathBuf,
}

impl Paths {
    pub fn new(log: impl Into<PathBuf>) -> Self {
        let log = log.into();
        Self {
            leader: with_suffix(&log, LEADER_SUFFIX),
            counter: with_suffix(&log, COUNTER_SUFFIX),
            log,
        }
    }
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// How the supervisor launches a worker: `program args... <slot>`.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// The running executable re-invoked with the log path.
    pub fn current_exe(log: &Path) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).arg(log))
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub paths: Paths,
    pub worker: WorkerCommand,
    pub tick: Duration,
    pub heartbeat_interval: Duration,
    pub status_interval: Duration,
    pub respawn_interval: Duration,
}

impl ControllerConfig {
    pub fn new(log: impl Into<PathBuf>, worker: WorkerCommand) -> Self {
        Self {
            paths: Paths::new(log),
            worker,
            tick: DEFAULT_TICK,
            heartbeat_interval: DEFAULT_HEARTBEAT,
            status_interval: DEFAULT_STATUS,
            respawn_interval: DEFAULT_RESPAWN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub paths: Paths,
    /// Delay between the two halves of `child2`.
    pub pause: Duration,
}

impl WorkerConfig {
    pub fn new(log: impl Into<PathBuf>) -> Self {
        Self {
            paths: Paths::new(log),
            pause: DEFAULT_PAUSE,
        }
    }
}
