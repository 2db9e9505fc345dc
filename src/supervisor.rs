//! Two fixed child slots, each backed by at most one live worker process.
//!
//! A slot is marked running under `slots` before its process is launched and
//! only cleared by that process's watcher once `wait` has returned, so a slot
//! never has two live occupants. Watchers also push a [`SlotEvent`] on a
//! channel the controller drains every tick.

use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::config::WorkerCommand;
use crate::worker::Slot;
use crate::Error;

#[derive(Debug, Default, Clone, Copy)]
struct SlotState {
    running: bool,
    pid: Option<u32>,
}

type SlotTable = Arc<Mutex<[SlotState; 2]>>;

#[derive(Debug)]
pub enum SpawnOutcome {
    Spawned { pid: u32 },
    /// The previous occupant has not exited yet; nothing was launched.
    StillRunning,
    /// Launch failed; the slot stays free and is retried next cycle.
    Failed(Error),
}

#[derive(Debug)]
pub enum SlotEvent {
    Exited {
        slot: Slot,
        pid: u32,
        status: ExitStatus,
    },
    WaitFailed {
        slot: Slot,
        pid: u32,
        error: std::io::Error,
    },
}

pub struct Supervisor {
    command: WorkerCommand,
    slots: SlotTable,
    events_tx: Sender<SlotEvent>,
    events_rx: Receiver<SlotEvent>,
    watchers: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn new(command: WorkerCommand) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            command,
            slots: Arc::new(Mutex::new([SlotState::default(); 2])),
            events_tx,
            events_rx,
            watchers: Vec::new(),
        }
    }

    pub fn is_running(&self, slot: Slot) -> bool {
        lock_slots(&self.slots)[slot.index()].running
    }

    pub fn pid(&self, slot: Slot) -> Option<u32> {
        lock_slots(&self.slots)[slot.index()].pid
    }

    /// Launches a worker into `slot` unless its previous occupant is alive.
    pub fn spawn(&mut self, slot: Slot) -> SpawnOutcome {
        self.reap_watchers();
        let child = {
            let mut slots = lock_slots(&self.slots);
            let state = &mut slots[slot.index()];
            if state.running {
                return SpawnOutcome::StillRunning;
            }
            match self.launch(slot) {
                Ok(child) => {
                    state.running = true;
                    state.pid = Some(child.id());
                    child
                }
                Err(source) => {
                    state.running = false;
                    state.pid = None;
                    return SpawnOutcome::Failed(Error::Spawn {
                        slot: slot.name(),
                        source,
                    });
                }
            }
        };
        let pid = child.id();
        self.watch(slot, child);
        SpawnOutcome::Spawned { pid }
    }

    /// One respawn cycle over every slot, in slot order.
    pub fn respawn_all(&mut self) -> Vec<(Slot, SpawnOutcome)> {
        Slot::ALL
            .into_iter()
            .map(|slot| (slot, self.spawn(slot)))
            .collect()
    }

    /// Exit notifications received since the last call.
    pub fn drain_events(&self) -> Vec<SlotEvent> {
        self.events_rx.try_iter().collect()
    }

    /// Waits for every spawned worker to exit and returns the remaining events.
    pub fn shutdown(&mut self) -> Vec<SlotEvent> {
        for handle in self.watchers.drain(..) {
            if handle.join().is_err() {
                log::error!("child watcher panicked");
            }
        }
        self.drain_events()
    }

    fn launch(&self, slot: Slot) -> std::io::Result<Child> {
        Command::new(&self.command.program)
            .args(&self.command.args)
            .arg(slot.name())
            .stdin(Stdio::null())
            .spawn()
    }

    fn watch(&mut self, slot: Slot, child: Child) {
        let slots = Arc::clone(&self.slots);
        let events = self.events_tx.clone();
        // Shared so the child can still be reaped here if the thread fails to start.
        let watcher = Arc::new(Mutex::new(Some(child)));
        let thread_watcher = Arc::clone(&watcher);
        let thread_slots = Arc::clone(&slots);
        let thread_events = events.clone();
        let spawned = thread::Builder::new()
            .name(format!("watch-{}", slot.name()))
            .spawn(move || {
                if let Some(child) = take_child(&thread_watcher) {
                    wait_and_release(slot, child, &thread_slots, &thread_events);
                }
            });
        match spawned {
            Ok(handle) => self.watchers.push(handle),
            Err(err) => {
                log::warn!("cannot start watcher for {slot}, waiting inline: {err}");
                if let Some(child) = take_child(&watcher) {
                    wait_and_release(slot, child, &slots, &events);
                }
            }
        }
    }

    fn reap_watchers(&mut self) {
        let (done, live): (Vec<_>, Vec<_>) = self
            .watchers
            .drain(..)
            .partition(|handle| handle.is_finished());
        self.watchers = live;
        for handle in done {
            if handle.join().is_err() {
                log::error!("child watcher panicked");
            }
        }
    }
}

fn take_child(cell: &Mutex<Option<Child>>) -> Option<Child> {
    cell.lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
}

fn wait_and_release(slot: Slot, mut child: Child, slots: &SlotTable, events: &Sender<SlotEvent>) {
    let pid = child.id();
    let event = match child.wait() {
        Ok(status) => SlotEvent::Exited { slot, pid, status },
        Err(error) => SlotEvent::WaitFailed { slot, pid, error },
    };
    {
        let mut slots = lock_slots(slots);
        let state = &mut slots[slot.index()];
        if state.pid == Some(pid) {
            state.running = false;
            state.pid = None;
        }
    }
    // The receiver is gone only once the supervisor itself has been dropped.
    let _ = events.send(event);
}

fn lock_slots(slots: &SlotTable) -> MutexGuard<'_, [SlotState; 2]> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
