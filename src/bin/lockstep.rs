use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use lockstep::config::DEFAULT_PAUSE;
use lockstep::input::stdin_source;
use lockstep::{
    run_worker, Controller, ControllerConfig, EventLog, QuantaClock, Slot, WorkerCommand,
    WorkerConfig,
};

#[derive(Parser)]
#[command(name = "lockstep", version)]
#[command(about = "Leader-elected shared counter with supervised workers")]
struct Cli {
    /// Event log path; `.leader` and `.counter` files sit next to it
    log_path: PathBuf,

    /// Run one worker sequence (child1 or child2) instead of the controller
    worker: Option<Slot>,

    /// Control loop tick
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,

    /// Leader heartbeat increment period
    #[arg(long, default_value_t = 300)]
    heartbeat_ms: u64,

    /// Leader status line period
    #[arg(long, default_value_t = 1000)]
    status_ms: u64,

    /// Worker respawn check period
    #[arg(long, default_value_t = 3000)]
    respawn_ms: u64,

    /// Pause between the two halves of child2
    #[arg(long, default_value_t = 2000)]
    pause_ms: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.worker {
        Some(slot) => {
            let mut config = WorkerConfig::new(&cli.log_path);
            config.pause = Duration::from_millis(cli.pause_ms);
            let failed = run_worker(slot, &config);
            if failed > 0 {
                log::warn!("{slot} finished with {failed} failed step(s)");
            }
        }
        None => run_controller(&cli)?,
    }
    Ok(())
}

fn run_controller(cli: &Cli) -> Result<()> {
    let mut worker = WorkerCommand::current_exe(&cli.log_path)
        .context("cannot resolve own executable")?;
    let pause = Duration::from_millis(cli.pause_ms);
    if pause != DEFAULT_PAUSE {
        worker = worker.arg("--pause-ms").arg(cli.pause_ms.to_string());
    }

    let mut config = ControllerConfig::new(&cli.log_path, worker);
    let floor = Duration::from_millis(1);
    config.tick = Duration::from_millis(cli.tick_ms).max(floor);
    config.heartbeat_interval = Duration::from_millis(cli.heartbeat_ms).max(floor);
    config.status_interval = Duration::from_millis(cli.status_ms);
    config.respawn_interval = Duration::from_millis(cli.respawn_ms);

    // Opened before any thread starts so the local UTC offset can be resolved.
    let log = EventLog::open_or_disabled(&config.paths.log);
    let controller = Controller::new(config, log, stdin_source(), QuantaClock::new());
    let reason = controller.run();
    log::info!("controller stopped: {reason:?}");
    Ok(())
}
