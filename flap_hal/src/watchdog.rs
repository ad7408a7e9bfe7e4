//! Watchdog implementations.
//!
//! [`SoftwareWatchdog`] stands in for a hardware task watchdog: a monitor
//! thread aborts the process when the control loop stops feeding it, leaving
//! the restart to whatever supervises the process. [`CountingWatchdog`]
//! only records feeds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::driver::{HalError, Watchdog};

/// Thread-backed starvation detector.
pub struct SoftwareWatchdog {
    epoch: Instant,
    last_feed_ms: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    monitor: Option<JoinHandle<()>>,
}

impl SoftwareWatchdog {
    /// Arm the watchdog. The process aborts if `feed` is not called within
    /// `timeout`.
    pub fn spawn(timeout: Duration) -> Result<Self, HalError> {
        let epoch = Instant::now();
        let last_feed_ms = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let last = last_feed_ms.clone();
        let stopped = stop.clone();
        let poll = (timeout / 4).max(Duration::from_millis(1));
        let timeout_ms = timeout.as_millis() as u64;

        let monitor = thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while !stopped.load(Ordering::Acquire) {
                    thread::sleep(poll);
                    let now_ms = epoch.elapsed().as_millis() as u64;
                    let fed_ms = last.load(Ordering::Acquire);
                    if now_ms.saturating_sub(fed_ms) > timeout_ms
                        && !stopped.load(Ordering::Acquire)
                    {
                        error!(
                            "watchdog starved for {}ms (limit {timeout_ms}ms), aborting",
                            now_ms - fed_ms
                        );
                        std::process::abort();
                    }
                }
            })
            .map_err(|e| HalError::InitFailed(format!("watchdog thread: {e}")))?;

        info!("Software watchdog armed ({}ms)", timeout_ms);
        Ok(Self {
            epoch,
            last_feed_ms,
            stop,
            monitor: Some(monitor),
        })
    }
}

impl Watchdog for SoftwareWatchdog {
    #[inline]
    fn feed(&mut self) {
        let now_ms = self.epoch.elapsed().as_millis() as u64;
        self.last_feed_ms.store(now_ms, Ordering::Release);
    }
}

impl Drop for SoftwareWatchdog {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.monitor.take() {
            let _ = handle.join();
        }
    }
}

/// Watchdog that only counts feeds.
#[derive(Debug, Clone, Default)]
pub struct CountingWatchdog {
    feeds: Arc<AtomicU64>,
}

impl CountingWatchdog {
    /// Create a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds observed across all handles.
    pub fn feeds(&self) -> u64 {
        self.feeds.load(Ordering::Relaxed)
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.feeds.fetch_add(1, Ordering::Relaxed);
    }
}
