//! Tick pacing and real-time thread setup.
//!
//! ## RT Setup
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)` to lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity` to pin the control thread to one core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`.
//!
//! Without the `rt` feature every step except the prefault is a no-op.
//!
//! ## Pacing
//! Absolute deadlines on `CLOCK_MONOTONIC` (`rt`) or `Instant` (simulation)
//! so that pacing does not drift. An overrun is counted and logged, never
//! fatal: the watchdog is the liveness check.

use flap_hal::{BusDriver, PowerSense, SerialPort, Watchdog};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::controller::Controller;
use crate::error::ControllerError;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-tick timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total ticks executed.
    pub cycle_count: u64,
    /// Last tick duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum tick duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum tick duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Ticks that did not finish within their period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (actual minus scheduled start).
    pub max_latency_ns: i64,
}

impl CycleStats {
    /// Zeroed statistics.
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record one tick. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average tick time [ns] (0 if nothing recorded).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Touch 256 KiB of stack so the first ticks do not page-fault.
fn prefault_stack() {
    let buf = [0xFFu8; 256 * 1024];
    std::hint::black_box(&buf);
}

/// Prepare the calling thread for the control loop: lock memory, prefault
/// the stack, pin to `cpu_core` and switch to `SCHED_FIFO` at `rt_priority`.
///
/// Without the `rt` feature only the stack is prefaulted.
#[cfg(feature = "rt")]
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), ControllerError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::sys::mman::{MlockallFlags, mlockall};
    use nix::unistd::Pid;

    let fail = |what: String| ControllerError::RtSetup(format!("control thread: {what}"));

    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| fail(format!("cannot lock tick memory: {e}")))?;
    prefault_stack();

    let mut cpus = CpuSet::new();
    cpus.set(cpu_core)
        .map_err(|e| fail(format!("core {cpu_core} out of range: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpus)
        .map_err(|e| fail(format!("cannot pin to core {cpu_core}: {e}")))?;

    let param = libc::sched_param {
        sched_priority: rt_priority,
    };
    // SAFETY: `param` is a valid, initialised sched_param; pid 0 is the caller.
    if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
        let err = std::io::Error::last_os_error();
        return Err(fail(format!("SCHED_FIFO priority {rt_priority} refused: {err}")));
    }
    Ok(())
}

/// Prepare the calling thread for the control loop.
///
/// Without the `rt` feature only the stack is prefaulted.
#[cfg(not(feature = "rt"))]
pub fn rt_setup(_cpu_core: usize, _rt_priority: i32) -> Result<(), ControllerError> {
    prefault_stack();
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Calls [`Controller::tick`] once per period until `running` clears.
pub struct CycleRunner {
    period: Duration,
    running: Arc<AtomicBool>,
    epoch: Instant,
    stats: CycleStats,
}

impl CycleRunner {
    /// Runner with a tick period of `tick_us` microseconds.
    pub fn new(tick_us: u64, running: Arc<AtomicBool>) -> Self {
        Self {
            period: Duration::from_micros(tick_us),
            running,
            epoch: Instant::now(),
            stats: CycleStats::new(),
        }
    }

    /// Timing statistics so far.
    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Monotonic milliseconds since the runner was created.
    #[inline]
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.stats.record(duration_ns, latency_ns);
        let budget_ns = self.period.as_nanos() as i64;
        if duration_ns > budget_ns {
            self.stats.overruns += 1;
            debug!(
                duration_ns,
                budget_ns,
                overruns = self.stats.overruns,
                "tick overrun"
            );
        }
    }

    /// Run the control loop until the running flag is cleared.
    ///
    /// # Errors
    /// `ControllerError::RtSetup` if the monotonic clock cannot be read.
    pub fn run<B, P, S, W>(
        &mut self,
        controller: &mut Controller<B, P, S, W>,
    ) -> Result<(), ControllerError>
    where
        B: BusDriver,
        P: PowerSense,
        S: SerialPort,
        W: Watchdog,
    {
        #[cfg(feature = "rt")]
        {
            self.run_rt_loop(controller)
        }

        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop(controller)
        }
    }

    #[cfg(feature = "rt")]
    fn run_rt_loop<B, P, S, W>(
        &mut self,
        controller: &mut Controller<B, P, S, W>,
    ) -> Result<(), ControllerError>
    where
        B: BusDriver,
        P: PowerSense,
        S: SerialPort,
        W: Watchdog,
    {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let now = || {
            clock_gettime(clock).map_err(|e| ControllerError::RtSetup(format!("clock_gettime: {e}")))
        };
        let period_ns = self.period.as_nanos() as i64;
        let mut scheduled = now()?;

        while self.running.load(Ordering::Acquire) {
            let start = now()?;
            let latency_ns = timespec_diff_ns(&start, &scheduled).max(0);

            controller.tick(self.now_ms());

            let end = now()?;
            self.record(timespec_diff_ns(&end, &start), latency_ns);

            scheduled = timespec_add_ns(scheduled, period_ns);
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &scheduled);
        }
        Ok(())
    }

    #[cfg(not(feature = "rt"))]
    fn run_sim_loop<B, P, S, W>(
        &mut self,
        controller: &mut Controller<B, P, S, W>,
    ) -> Result<(), ControllerError>
    where
        B: BusDriver,
        P: PowerSense,
        S: SerialPort,
        W: Watchdog,
    {
        let mut scheduled = Instant::now();

        while self.running.load(Ordering::Acquire) {
            let start = Instant::now();
            let latency_ns = start.saturating_duration_since(scheduled).as_nanos() as i64;

            controller.tick(self.now_ms());

            self.record(start.elapsed().as_nanos() as i64, latency_ns);

            scheduled += self.period;
            let now = Instant::now();
            if scheduled > now {
                std::thread::sleep(scheduled - now);
            }
        }
        Ok(())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let total = ts.tv_nsec() + ns;
    TimeSpec::new(
        ts.tv_sec() + total.div_euclid(1_000_000_000),
        total.rem_euclid(1_000_000_000),
    )
}

/// `a - b` in nanoseconds.
#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
