use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};

use lockstep::input::ChannelSource;
use lockstep::{
    Controller, ControllerConfig, CounterStore, EventLog, FileLock, ManualClock, Paths,
    QuantaClock, Role, Shutdown, Slot, Step, WorkerCommand,
};
use tempfile::{tempdir, TempDir};

struct Harness {
    _dir: TempDir,
    paths: Paths,
    tx: Sender<String>,
    clock: ManualClock,
    controller: Controller<ChannelSource, ManualClock>,
}

fn shell(script: &str) -> WorkerCommand {
    WorkerCommand::new("/bin/sh").arg("-c").arg(script).arg("sh")
}

fn harness_with(worker: WorkerCommand, hold: impl FnOnce(&Paths)) -> Harness {
    let dir = tempdir().expect("tempdir");
    let config = ControllerConfig::new(dir.path().join("events.log"), worker);
    let paths = config.paths.clone();
    hold(&paths);
    let (tx, rx) = mpsc::channel();
    let clock = ManualClock::new();
    let log = EventLog::open(&paths.log).expect("open log");
    let controller = Controller::new(config, log, ChannelSource::new(rx), clock.clone());
    Harness {
        _dir: dir,
        paths,
        tx,
        clock,
        controller,
    }
}

fn harness(worker: WorkerCommand) -> Harness {
    harness_with(worker, |_| {})
}

fn log_lines(paths: &Paths) -> Vec<String> {
    std::fs::read_to_string(&paths.log)
        .expect("read log")
        .lines()
        .map(str::to_string)
        .collect()
}

fn message(line: &str) -> &str {
    // "<timestamp> - Process <pid> - <message>"
    line.splitn(3, " - ").nth(2).unwrap_or("")
}

#[test]
fn lone_process_leads_and_exits_cleanly() {
    let mut h = harness(shell("exit 0"));
    h.controller.start();
    assert_eq!(h.controller.role(), Role::Leader);
    assert!(h.controller.heartbeat_running());

    assert_eq!(h.controller.step(), Step::Continue);
    h.tx.send("EXIT".to_string()).expect("send");
    assert_eq!(h.controller.step(), Step::Stop(Shutdown::ExitCommand));
    h.controller.shutdown(Shutdown::ExitCommand);
    assert!(!h.controller.heartbeat_running());

    let lines = log_lines(&h.paths);
    assert_eq!(message(&lines[0]), "started as leader.");
    assert_eq!(message(lines.last().expect("last")), "exited.");
    let stamps: Vec<&str> = lines.iter().map(|l| &l[..23]).collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]), "{stamps:?}");

    // Leadership was released with the controller.
    assert!(FileLock::try_acquire(&h.paths.leader)
        .expect("open")
        .is_some());
}

#[test]
fn follower_takes_over_when_lock_is_released() {
    let mut held = None;
    let mut h = harness_with(shell("exit 0"), |paths| {
        let lock = FileLock::try_acquire(&paths.leader)
            .expect("open")
            .expect("hold");
        lock.write_owner_record().expect("record");
        held = Some(lock);
    });

    h.controller.start();
    assert_eq!(h.controller.role(), Role::Follower);
    assert!(!h.controller.heartbeat_running());
    for _ in 0..3 {
        h.clock.advance(Duration::from_secs(5));
        assert_eq!(h.controller.step(), Step::Continue);
        assert_eq!(h.controller.role(), Role::Follower);
    }
    // Followers neither log status nor supervise workers.
    assert!(!h.controller.supervisor().is_running(Slot::Child1));

    drop(held.take());
    h.controller.step();
    assert_eq!(h.controller.role(), Role::Leader);
    assert!(h.controller.heartbeat_running());
    h.controller.shutdown(Shutdown::EndOfInput);

    let messages: Vec<String> = log_lines(&h.paths)
        .iter()
        .map(|l| message(l).to_string())
        .collect();
    assert_eq!(messages[0], "started as follower.");
    assert_eq!(
        messages[1],
        format!("leader is process {}.", std::process::id())
    );
    assert!(messages.iter().any(|m| m == "became leader."));
    assert!(!messages.iter().any(|m| m.starts_with("Counter: ")));
}

fn follower_harness() -> (Harness, FileLock) {
    let mut held = None;
    let h = harness_with(shell("exit 0"), |paths| {
        held = FileLock::try_acquire(&paths.leader).expect("open");
    });
    (h, held.expect("hold"))
}

#[test]
fn integer_input_overwrites_counter() {
    let (mut h, _held) = follower_harness();
    let store = CounterStore::new(&h.paths.counter);
    store.save(7).expect("seed");

    h.tx.send("100".to_string()).expect("send");
    h.controller.step();
    h.controller.step();
    assert_eq!(store.load(), 100);
    assert!(log_lines(&h.paths)
        .iter()
        .any(|l| message(l) == "set counter to: 100"));
}

#[test]
fn invalid_input_is_logged_once_and_ignored() {
    let (mut h, _held) = follower_harness();
    let store = CounterStore::new(&h.paths.counter);
    store.save(100).expect("seed");

    h.tx.send("abc".to_string()).expect("send");
    h.controller.step();
    h.controller.step();
    assert_eq!(store.load(), 100);
    let errors: Vec<_> = log_lines(&h.paths)
        .into_iter()
        .filter(|l| message(l).starts_with("error"))
        .collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(message(&errors[0]), "error, invalid input: abc");
}

#[test]
fn one_line_is_drained_per_step() {
    let (mut h, _held) = follower_harness();
    let store = CounterStore::new(&h.paths.counter);
    h.tx.send("1".to_string()).expect("send");
    h.tx.send("2".to_string()).expect("send");
    h.tx.send("EXIT".to_string()).expect("send");

    assert_eq!(h.controller.step(), Step::Continue);
    assert_eq!(store.load(), 1);
    assert_eq!(h.controller.step(), Step::Continue);
    assert_eq!(store.load(), 2);
    assert_eq!(h.controller.step(), Step::Stop(Shutdown::ExitCommand));
}

#[test]
fn end_of_input_stops_the_loop() {
    let (mut h, _held) = follower_harness();
    assert_eq!(h.controller.step(), Step::Continue);
    drop(h.tx);
    assert_eq!(h.controller.step(), Step::Stop(Shutdown::EndOfInput));
    h.controller.shutdown(Shutdown::EndOfInput);
    let lines = log_lines(&h.paths);
    assert_eq!(message(lines.last().expect("last")), "exited.");
}

#[test]
fn leader_logs_status_and_supervises_workers() {
    let mut h = harness(shell("sleep 1"));
    h.controller.start();
    assert_eq!(h.controller.role(), Role::Leader);

    h.clock.advance(Duration::from_millis(1000));
    h.controller.step();
    assert!(log_lines(&h.paths)
        .iter()
        .any(|l| message(l).starts_with("Counter: ")));
    assert!(!h.controller.supervisor().is_running(Slot::Child1));

    h.clock.advance(Duration::from_millis(2000));
    h.controller.step();
    assert!(h.controller.supervisor().is_running(Slot::Child1));
    assert!(h.controller.supervisor().is_running(Slot::Child2));

    // Next cycle lands while both workers are still sleeping.
    h.clock.advance(Duration::from_millis(3000));
    h.controller.step();

    h.controller.shutdown(Shutdown::ExitCommand);
    let messages: Vec<String> = log_lines(&h.paths)
        .iter()
        .map(|l| message(l).to_string())
        .collect();
    for slot in ["child1", "child2"] {
        assert!(messages
            .iter()
            .any(|m| m.starts_with(&format!("started {slot} as process "))));
        assert!(messages
            .iter()
            .any(|m| m == &format!("{slot} is still running, not spawning a new instance.")));
        assert!(messages
            .iter()
            .any(|m| m.starts_with(slot) && m.ends_with("exited with status 0.")));
    }
    assert_eq!(messages.last().map(String::as_str), Some("exited."));
}

#[test]
fn launch_failures_are_logged_and_retried() {
    let mut h = harness(WorkerCommand::new("/nonexistent/lockstep-worker"));
    h.controller.start();
    for _ in 0..2 {
        h.clock.advance(Duration::from_secs(3));
        assert_eq!(h.controller.step(), Step::Continue);
    }
    let failures = log_lines(&h.paths)
        .into_iter()
        .filter(|l| message(l).starts_with("error, failed to start child1"))
        .count();
    assert_eq!(failures, 2);
    h.controller.shutdown(Shutdown::EndOfInput);
}

#[test]
fn run_loop_honours_exit() {
    let dir = tempdir().expect("tempdir");
    let mut config = ControllerConfig::new(dir.path().join("events.log"), shell("exit 0"));
    config.tick = Duration::from_millis(10);
    config.heartbeat_interval = Duration::from_millis(20);
    let paths = config.paths.clone();
    let (tx, rx) = mpsc::channel();
    let log = EventLog::open(&paths.log).expect("open log");
    let controller = Controller::new(config, log, ChannelSource::new(rx), QuantaClock::new());

    let handle = thread::spawn(move || controller.run());
    thread::sleep(Duration::from_millis(200));
    tx.send("EXIT".to_string()).expect("send");
    let started = Instant::now();
    assert_eq!(handle.join().expect("join"), Shutdown::ExitCommand);
    assert!(started.elapsed() < Duration::from_secs(5));

    // Heartbeat ran while leader and stopped at shutdown.
    let store = CounterStore::new(&paths.counter);
    let after = store.load();
    assert!(after > 32, "counter {after}");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(store.load(), after);
}

#[test]
fn unopenable_log_does_not_stop_leadership() {
    let dir = tempdir().expect("tempdir");
    let mut config = ControllerConfig::new(dir.path().join("events.log"), shell("exit 0"));
    config.heartbeat_interval = Duration::from_millis(20);
    let paths = config.paths.clone();
    std::fs::create_dir(&paths.log).expect("mkdir");
    let (tx, rx) = mpsc::channel();
    let log = EventLog::open_or_disabled(&paths.log);
    let mut controller = Controller::new(config, log, ChannelSource::new(rx), ManualClock::new());

    controller.start();
    assert_eq!(controller.role(), Role::Leader);
    thread::sleep(Duration::from_millis(200));
    assert!(CounterStore::new(&paths.counter).load() > 32);

    tx.send("EXIT".to_string()).expect("send");
    assert_eq!(controller.step(), Step::Stop(Shutdown::ExitCommand));
    controller.shutdown(Shutdown::ExitCommand);
}
