//! Leader/follower control loop.
//!
//! A follower probes the leadership lock once per tick. Once acquired the lock
//! is never re-probed: leadership ends only when this process shuts down (or
//! dies, and the kernel drops the lock). While leader the controller runs the
//! heartbeat, logs the counter every status interval and refills the worker
//! slots every respawn interval. Every role drains one input line per tick.

use std::os::unix::process::ExitStatusExt;
use std::thread;

use crate::clock::Clock;
use crate::config::ControllerConfig;
use crate::counter::CounterStore;
use crate::event_log::EventLog;
use crate::heartbeat::Heartbeat;
use crate::input::{Command, CommandSource, InputEvent};
use crate::lock::{leader_alive, read_leader_info, FileLock};
use crate::role::Role;
use crate::supervisor::{SlotEvent, SpawnOutcome, Supervisor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    ExitCommand,
    EndOfInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(Shutdown),
}

pub struct Controller<S, C> {
    config: ControllerConfig,
    log: EventLog,
    store: CounterStore,
    source: S,
    clock: C,
    role: Role,
    leader_lock: Option<FileLock>,
    heartbeat: Option<Heartbeat>,
    supervisor: Supervisor,
    last_status: u64,
    last_respawn: u64,
    probe_failing: bool,
    started: bool,
}

impl<S: CommandSource, C: Clock> Controller<S, C> {
    pub fn new(config: ControllerConfig, log: EventLog, source: S, clock: C) -> Self {
        let store = CounterStore::new(&config.paths.counter);
        let supervisor = Supervisor::new(config.worker.clone());
        let now = clock.now();
        Self {
            config,
            log,
            store,
            source,
            clock,
            role: Role::Follower,
            leader_lock: None,
            heartbeat: None,
            supervisor,
            last_status: now,
            last_respawn: now,
            probe_failing: false,
            started: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.is_some()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn store(&self) -> &CounterStore {
        &self.store
    }

    /// Logs startup and makes the first leadership attempt.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let acquired = self.probe();
        self.role = Role::from_acquired(acquired);
        self.log.event(format!("started as {}.", self.role));
        if acquired {
            self.on_promoted();
        } else {
            self.log_current_leader();
        }
    }

    /// One iteration of the loop, without the tick sleep.
    pub fn step(&mut self) -> Step {
        self.start();

        if !self.role.is_leader() && self.probe() {
            self.change_role(Role::Leader);
        }

        for event in self.supervisor.drain_events() {
            self.log_slot_event(event);
        }

        if let Some(reason) = self.drain_input() {
            return Step::Stop(reason);
        }

        if self.role.is_leader() {
            let now = self.clock.now();
            if self.clock.elapsed_since(self.last_status) >= self.config.status_interval {
                self.log.event(format!("Counter: {}", self.store.load()));
                self.last_status = now;
            }
            if self.clock.elapsed_since(self.last_respawn) >= self.config.respawn_interval {
                self.respawn();
                self.last_respawn = now;
            }
        }
        Step::Continue
    }

    /// Runs until `EXIT` or end of input, then shuts down.
    pub fn run(mut self) -> Shutdown {
        loop {
            if let Step::Stop(reason) = self.step() {
                self.shutdown(reason);
                return reason;
            }
            thread::sleep(self.config.tick);
        }
    }

    /// Stops the heartbeat, waits for live workers, writes the final line,
    /// closes the log and releases leadership.
    pub fn shutdown(&mut self, reason: Shutdown) {
        if let Some(mut heartbeat) = self.heartbeat.take() {
            heartbeat.stop();
        }
        for event in self.supervisor.shutdown() {
            self.log_slot_event(event);
        }
        log::info!("shutting down: {reason:?}");
        self.log.event("exited.");
        self.log.close();
        if let Some(lock) = self.leader_lock.take() {
            lock.release();
        }
    }

    fn probe(&mut self) -> bool {
        match FileLock::try_acquire(&self.config.paths.leader) {
            Ok(Some(lock)) => {
                self.probe_failing = false;
                self.leader_lock = Some(lock);
                true
            }
            Ok(None) => {
                self.probe_failing = false;
                false
            }
            Err(err) => {
                if !self.probe_failing {
                    self.log.event(format!("error, cannot open leader lock: {err}"));
                }
                log::warn!("leader probe failed: {err}");
                self.probe_failing = true;
                false
            }
        }
    }

    fn change_role(&mut self, next: Role) {
        if let Some(message) = self.role.transition_message(next) {
            self.log.event(message);
        }
        self.role = next;
        if next.is_leader() {
            self.on_promoted();
        } else {
            self.heartbeat = None;
            self.leader_lock = None;
        }
    }

    fn on_promoted(&mut self) {
        if let Some(lock) = &self.leader_lock {
            if let Err(err) = lock.write_owner_record() {
                log::warn!("cannot record leader identity: {err}");
            }
        }
        match Heartbeat::start(self.store.clone(), self.config.heartbeat_interval) {
            Ok(heartbeat) => self.heartbeat = Some(heartbeat),
            Err(err) => self
                .log
                .event(format!("error, failed to start counter heartbeat: {err}")),
        }
        let now = self.clock.now();
        self.last_status = now;
        self.last_respawn = now;
    }

    fn log_current_leader(&self) {
        let leader = &self.config.paths.leader;
        match (read_leader_info(leader), leader_alive(leader)) {
            (Ok(Some(info)), Ok(true)) => self.log.event(format!("leader is process {}.", info.pid)),
            (Err(err), _) | (_, Err(err)) => log::debug!("leader record unreadable: {err}"),
            _ => {}
        }
    }

    fn drain_input(&mut self) -> Option<Shutdown> {
        let line = match self.source.poll_line() {
            Ok(InputEvent::Line(line)) => line,
            Ok(InputEvent::Idle) => return None,
            Ok(InputEvent::Closed) => return Some(Shutdown::EndOfInput),
            Err(err) => {
                self.log.event(format!("error, input unreadable: {err}"));
                return Some(Shutdown::EndOfInput);
            }
        };
        match line.parse::<Command>() {
            Ok(Command::Exit) => Some(Shutdown::ExitCommand),
            Ok(Command::Set(value)) => {
                match self.store.save(value) {
                    Ok(()) => self.log.event(format!("set counter to: {value}")),
                    Err(err) => self
                        .log
                        .event(format!("error, failed to set counter to {value}: {err}")),
                }
                None
            }
            Err(err) => {
                self.log.event(format!("error, {err}"));
                None
            }
        }
    }

    fn respawn(&mut self) {
        for (slot, outcome) in self.supervisor.respawn_all() {
            match outcome {
                SpawnOutcome::Spawned { pid } => {
                    self.log.event(format!("started {slot} as process {pid}."))
                }
                SpawnOutcome::StillRunning => self.log.event(format!(
                    "{slot} is still running, not spawning a new instance."
                )),
                SpawnOutcome::Failed(err) => self.log.event(format!("error, {err}.")),
            }
        }
    }

    fn log_slot_event(&self, event: SlotEvent) {
        match event {
            SlotEvent::Exited { slot, pid, status } => match (status.code(), status.signal()) {
                (Some(code), _) => self
                    .log
                    .event(format!("{slot} (process {pid}) exited with status {code}.")),
                (None, Some(signal)) => self
                    .log
                    .event(format!("{slot} (process {pid}) terminated by signal {signal}.")),
                (None, None) => self.log.event(format!("{slot} (process {pid}) exited.")),
            },
            SlotEvent::WaitFailed { slot, pid, error } => self
                .log
                .event(format!("error, lost track of {slot} (process {pid}): {error}")),
        }
    }
}
