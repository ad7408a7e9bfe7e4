//! # Split-flap Controller
//!
//! Loads the TOML configuration, starts the control loop on a dedicated
//! thread and a reporter thread that logs status changes. The host protocol
//! runs over stdin/stdout; logs go to stderr.

use clap::Parser;
use flap_common::config::{FlapConfig, LogLevel};
use flap_common::state::ModuleState;
use flap_controller::controller::{Controller, Peripherals};
use flap_controller::cycle::{CycleRunner, CycleStats, rt_setup};
use flap_controller::error::ControllerError;
use flap_controller::status::StatusCache;
use flap_hal::drivers::DRIVER_NAMES;
use flap_hal::drivers::simulation::SimulatedChain;
use flap_hal::serial::StdioSerial;
use flap_hal::watchdog::SoftwareWatchdog;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Control thread stack; leaves room for the RT prefault.
const CONTROL_STACK_BYTES: usize = 4 * 1024 * 1024;

/// Split-flap display controller
#[derive(Parser, Debug)]
#[command(name = "flap_controller")]
#[command(version)]
#[command(about = "Real-time control loop for a multi-module split-flap display")]
struct Args {
    /// Path to the controller configuration TOML. Defaults apply when omitted.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the configured number of modules.
    #[arg(long)]
    num_modules: Option<usize>,

    /// Bus driver backend.
    #[arg(long, default_value = "simulation")]
    driver: String,

    /// CPU core to pin the control thread to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = load_config(&args);
    setup_tracing(&args, config.as_ref().map_or(LogLevel::Info, |c| c.shared.log_level));

    info!("Split-flap controller v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(ControllerError::from)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Split-flap controller shutdown complete");
}

fn load_config(args: &Args) -> Result<FlapConfig, flap_common::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => FlapConfig::load_validated(path)?,
        None => FlapConfig::default(),
    };
    if let Some(n) = args.num_modules {
        config.display.num_modules = n;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args, config: FlapConfig) -> Result<(), ControllerError> {
    if !DRIVER_NAMES.contains(&args.driver.as_str()) {
        return Err(ControllerError::UnknownDriver(args.driver.clone()));
    }
    info!(
        service = %config.shared.service_name,
        modules = config.display.num_modules,
        layout = ?config.display.layout,
        tick_us = config.timing.tick_us,
        driver = %args.driver,
        "Config OK"
    );

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::Release);
    })
    .map_err(|e| ControllerError::RtSetup(format!("signal handler: {e}")))?;

    let cache = StatusCache::new(config.display.num_modules);
    let reporter = spawn_reporter(&config, cache.clone(), running.clone())?;

    let control = {
        let running = running.clone();
        let (cpu_core, rt_priority) = (args.cpu_core, args.rt_priority);
        thread::Builder::new()
            .name("flap-control".into())
            .stack_size(CONTROL_STACK_BYTES)
            .spawn(move || control_thread(&config, cache, running, cpu_core, rt_priority))
            .map_err(|e| ControllerError::RtSetup(format!("spawn control thread: {e}")))?
    };

    let outcome = control
        .join()
        .unwrap_or_else(|_| Err(ControllerError::RtSetup("control thread panicked".into())));
    running.store(false, Ordering::Release);
    if reporter.join().is_err() {
        warn!("status reporter panicked");
    }

    let stats = outcome?;
    info!(
        ticks = stats.cycle_count,
        min_ns = stats.min_cycle_ns,
        max_ns = stats.max_cycle_ns,
        avg_ns = stats.avg_cycle_ns(),
        max_latency_ns = stats.max_latency_ns,
        overruns = stats.overruns,
        "Cycle statistics"
    );
    Ok(())
}

fn control_thread(
    config: &FlapConfig,
    cache: Arc<StatusCache>,
    running: Arc<AtomicBool>,
    cpu_core: usize,
    rt_priority: i32,
) -> Result<CycleStats, ControllerError> {
    rt_setup(cpu_core, rt_priority)?;
    info!(cpu_core, rt_priority, "RT setup complete");

    let chain = SimulatedChain::new(
        config.display.layout,
        config.display.num_modules,
        config.motion.steps_per_revolution,
    )
    .with_realtime(true);
    let power = chain.power_sensor();
    let io = Peripherals {
        bus: chain,
        power,
        serial: StdioSerial::spawn()?,
        watchdog: SoftwareWatchdog::spawn(Duration::from_millis(
            config.timing.watchdog_timeout_ms,
        ))?,
    };

    let mut controller = Controller::new(config, io, cache)?;
    match controller.boot() {
        Ok(()) => info!("Boot complete, entering control loop"),
        Err(ControllerError::SelfTestFailed { faults }) => {
            warn!(faults, "Holding in diagnostic mode until restarted");
        }
        Err(e) => return Err(e),
    }

    let mut runner = CycleRunner::new(config.timing.tick_us, running);
    runner.run(&mut controller)?;
    Ok(runner.stats().clone())
}

fn spawn_reporter(
    config: &FlapConfig,
    cache: Arc<StatusCache>,
    running: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>, ControllerError> {
    let period = Duration::from_millis(config.timing.status_report_ms);
    let alphabet = config.display.alphabet.clone();
    thread::Builder::new()
        .name("flap-status".into())
        .spawn(move || {
            let mut last_generation = 0;
            while running.load(Ordering::Acquire) {
                thread::sleep(period);
                let (snapshot, generation) = cache.read_versioned();
                if generation == last_generation {
                    continue;
                }
                last_generation = generation;

                let shown: String = snapshot
                    .modules()
                    .iter()
                    .map(|m| alphabet.symbol(m.flap_index as usize).unwrap_or('?'))
                    .collect();
                let faulted = snapshot
                    .modules()
                    .iter()
                    .filter(|m| m.state != ModuleState::Normal)
                    .count();
                if faulted == 0 {
                    info!(display = %shown, "status");
                } else {
                    info!(display = %shown, faulted, "status");
                    for (i, m) in snapshot.modules().iter().enumerate() {
                        if m.state != ModuleState::Normal {
                            debug!(module = i, state = %m.state, "module not normal");
                        }
                    }
                }
            }
        })
        .map_err(|e| ControllerError::RtSetup(format!("spawn status reporter: {e}")))
}

/// Setup tracing subscriber on stderr; stdout carries the host protocol.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        "debug"
    } else {
        level.as_directive()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
