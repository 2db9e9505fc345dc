//! File-lock leader election with a supervised, persisted shared counter.
//!
//! Cooperating processes started on the same event-log path race for an
//! advisory lock on `<log>.leader`. The holder increments `<log>.counter` on a
//! heartbeat and keeps two short-lived worker processes cycling; every process
//! appends to the shared log and takes `EXIT` or integer commands on stdin.

pub mod clock;
pub mod config;
pub mod controller;
pub mod counter;
pub mod error;
pub mod event_log;
pub mod heartbeat;
pub mod input;
pub mod lock;
pub mod role;
pub mod supervisor;
pub mod worker;

pub use clock::{Clock, ManualClock, QuantaClock};
pub use config::{ControllerConfig, Paths, WorkerCommand, WorkerConfig};
pub use controller::{Controller, Shutdown, Step};
pub use counter::{CounterStore, DEFAULT_COUNTER};
pub use error::{Error, Result};
pub use event_log::EventLog;
pub use lock::{leader_alive, read_leader_info, FileLock, LeaderInfo};
pub use role::Role;
pub use supervisor::{SlotEvent, SpawnOutcome, Supervisor};
pub use worker::{run_worker, Slot, Worker};
