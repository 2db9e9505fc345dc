use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lockstep::{CounterStore, Paths};
use tempfile::tempdir;

const BIN: &str = env!("CARGO_BIN_EXE_lockstep");

fn controller(log: &Path) -> Child {
    Command::new(BIN)
        .arg(log)
        .args(["--tick-ms", "20", "--heartbeat-ms", "50", "--status-ms", "200"])
        .args(["--respawn-ms", "300", "--pause-ms", "100"])
        .stdin(Stdio::piped())
        .spawn()
        .expect("spawn controller")
}

fn send(child: &mut Child, line: &str) {
    let stdin = child.stdin.as_mut().expect("stdin");
    writeln!(stdin, "{line}").expect("write stdin");
}

fn wait_for(log: &Path, needle: &str) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if std::fs::read_to_string(log)
            .map(|s| s.contains(needle))
            .unwrap_or(false)
        {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn worker_invocation_runs_one_sequence() {
    let dir = tempdir().expect("tempdir");
    let paths = Paths::new(dir.path().join("events.log"));
    CounterStore::new(&paths.counter).save(5).expect("seed");

    let status = Command::new(BIN)
        .arg(&paths.log)
        .arg("child1")
        .status()
        .expect("run child1");
    assert!(status.success());
    assert_eq!(CounterStore::new(&paths.counter).load(), 15);

    let status = Command::new(BIN)
        .arg(&paths.log)
        .args(["child2", "--pause-ms", "10"])
        .status()
        .expect("run child2");
    assert!(status.success());
    assert_eq!(CounterStore::new(&paths.counter).load(), 15);
}

#[test]
fn unknown_worker_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let status = Command::new(BIN)
        .arg(dir.path().join("events.log"))
        .arg("child9")
        .status()
        .expect("run");
    assert!(!status.success());
}

#[test]
fn follower_takes_over_after_leader_exits() {
    let dir = tempdir().expect("tempdir");
    let paths = Paths::new(dir.path().join("events.log"));

    let mut first = controller(&paths.log);
    assert!(wait_for(&paths.log, "started as leader."));
    let mut second = controller(&paths.log);
    assert!(wait_for(&paths.log, "started as follower."));

    // The leader cycles workers into the shared log.
    assert!(wait_for(&paths.log, "(child1) set counter to:"));

    send(&mut first, "EXIT");
    assert!(first.wait().expect("wait first").success());
    assert!(wait_for(&paths.log, "became leader."));

    send(&mut second, "100");
    assert!(wait_for(&paths.log, "set counter to: 100"));
    drop(second.stdin.take());
    assert!(second.wait().expect("wait second").success());

    let log = std::fs::read_to_string(&paths.log).expect("log");
    let exits = log.lines().filter(|l| l.ends_with(" - exited.")).count();
    assert_eq!(exits, 2);
    assert!(log.trim_end().ends_with(" - exited."));
}

#[test]
fn controller_leads_without_an_event_log() {
    let dir = tempdir().expect("tempdir");
    let paths = Paths::new(dir.path().join("events.log"));
    std::fs::create_dir(&paths.log).expect("mkdir");

    let mut child = controller(&paths.log);
    let store = CounterStore::new(&paths.counter);
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.try_load().ok().flatten().is_none() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert!(store.try_load().expect("load").is_some(), "counter never written");
    assert!(paths.leader.exists());

    send(&mut child, "EXIT");
    assert!(child.wait().expect("wait").success());
}
