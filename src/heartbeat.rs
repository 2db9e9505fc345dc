//! Leader-only background incrementer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::counter::CounterStore;
use crate::{Error, Result};

/// Increments the counter once per period until stopped.
///
/// Owned by the controller for as long as it is leader; `stop` (or drop)
/// wakes the thread and joins it.
pub struct Heartbeat {
    shutdown: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn start(store: CounterStore, period: Duration) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));
        let thread_shutdown = Arc::clone(&shutdown);
        let thread_ticks = Arc::clone(&ticks);
        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || run(store, period, &thread_shutdown, &thread_ticks))
            .map_err(Error::Io)?;
        Ok(Self {
            shutdown,
            ticks,
            handle: Some(handle),
        })
    }

    /// Number of completed increments.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::error!("heartbeat thread panicked");
            }
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(store: CounterStore, period: Duration, shutdown: &AtomicBool, ticks: &AtomicU64) {
    loop {
        let deadline = Instant::now() + period;
        loop {
            if shutdown.load(Ordering::Acquire) {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::park_timeout(deadline - now);
        }
        match store.update(|value| value.wrapping_add(1)) {
            Ok(value) => log::trace!("heartbeat counter={value}"),
            Err(err) => log::warn!("heartbeat update failed: {err}"),
        }
        ticks.fetch_add(1, Ordering::AcqRel);
    }
}
