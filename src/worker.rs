//! Short-lived child processes that each apply one fixed counter transform.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

use crate::config::WorkerConfig;
use crate::counter::CounterStore;
use crate::event_log::EventLog;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Child1,
    Child2,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Child1, Slot::Child2];

    pub fn name(self) -> &'static str {
        match self {
            Slot::Child1 => "child1",
            Slot::Child2 => "child2",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Slot::Child1 => 0,
            Slot::Child2 => 1,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Slot {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "child1" => Ok(Slot::Child1),
            "child2" => Ok(Slot::Child2),
            other => Err(Error::UnknownWorker(other.to_string())),
        }
    }
}

pub struct Worker {
    slot: Slot,
    store: CounterStore,
    log: EventLog,
    pause: Duration,
}

impl Worker {
    pub fn new(slot: Slot, store: CounterStore, log: EventLog, pause: Duration) -> Self {
        Self {
            slot,
            store,
            log,
            pause,
        }
    }

    /// Runs the slot's sequence once.
    ///
    /// `child1` adds 10. `child2` doubles, waits `pause`, then halves with
    /// truncation toward zero; anything written in between is halved too.
    /// A failed step is logged and the sequence carries on. Returns the
    /// number of failed steps.
    pub fn run(&self) -> usize {
        let failed = match self.slot {
            Slot::Child1 => self.apply(|value| value.wrapping_add(10)) as usize,
            Slot::Child2 => {
                let doubled = self.apply(|value| value.wrapping_mul(2));
                thread::sleep(self.pause);
                doubled as usize + self.apply(|value| value / 2) as usize
            }
        };
        self.log.close();
        failed
    }

    /// Returns true when the step failed.
    fn apply(&self, f: impl FnOnce(i64) -> i64) -> bool {
        match self.store.update(f) {
            Ok(value) => {
                self.log.event(format!("set counter to: {value}"));
                false
            }
            Err(err) => {
                self.log.event(format!("error, failed to update counter: {err}"));
                log::warn!("{} step failed: {err}", self.slot);
                true
            }
        }
    }
}

/// Entry point for `<program> <log_path> <slot>`. Returns the number of
/// failed steps; the sequence always runs to the end.
pub fn run_worker(slot: Slot, config: &WorkerConfig) -> usize {
    let log = EventLog::open_or_disabled(&config.paths.log).with_tag(slot.name());
    let store = CounterStore::new(&config.paths.counter);
    log::debug!("{slot} starting on {}", store.path().display());
    Worker::new(slot, store, log, config.pause).run()
}
