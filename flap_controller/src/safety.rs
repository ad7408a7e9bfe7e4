//! Electrical safety monitor.
//!
//! Evaluated once per tick after the bus transfer. Current is sampled at a
//! bounded rate; bus voltage is checked on every tick where all modules are
//! idle. A violation returns the [`DisableReason`]; the controller then
//! disables every module and latches the reason here until re-armed.

use flap_common::config::SafetyConfig;
use flap_common::protocol::DisableReason;
use flap_hal::PowerSense;
use tracing::debug;

/// Aggregate module activity for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Activity {
    /// Every module is idle.
    pub all_idle: bool,
    /// Every module is stopped.
    pub all_stopped: bool,
}

/// Over-current, stall and supply-band supervision.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    config: SafetyConfig,
    over_current_limit_ma: f32,
    last_sample_ms: Option<u64>,
    stopped_since_ms: Option<u64>,
    latched: Option<DisableReason>,
}

impl SafetyMonitor {
    /// Monitor for `num_modules` modules.
    pub fn new(config: &SafetyConfig, num_modules: usize) -> Self {
        Self {
            config: config.clone(),
            over_current_limit_ma: config.over_current_ma_per_module * num_modules as f32,
            last_sample_ms: None,
            stopped_since_ms: None,
            latched: None,
        }
    }

    /// Total current above which the display is disabled [mA].
    #[inline]
    pub fn over_current_limit_ma(&self) -> f32 {
        self.over_current_limit_ma
    }

    /// Check telemetry for this tick.
    pub fn evaluate(
        &mut self,
        now_ms: u64,
        activity: Activity,
        power: &mut dyn PowerSense,
    ) -> Option<DisableReason> {
        if activity.all_stopped {
            self.stopped_since_ms.get_or_insert(now_ms);
        } else {
            self.stopped_since_ms = None;
        }

        let due = self
            .last_sample_ms
            .is_none_or(|last| now_ms.saturating_sub(last) > self.config.sample_interval_ms);
        if due {
            self.last_sample_ms = Some(now_ms);
            if let Some(current) = power.current_ma() {
                if current > self.over_current_limit_ma {
                    debug!(current, limit = self.over_current_limit_ma, "over current");
                    return Some(DisableReason::OverCurrent);
                }
                if let Some(since) = self.stopped_since_ms {
                    if now_ms.saturating_sub(since) > self.config.stopped_grace_ms
                        && current >= self.config.unexpected_current_ma
                    {
                        debug!(current, stopped_ms = now_ms - since, "current while stopped");
                        return Some(DisableReason::UnexpectedCurrent);
                    }
                }
            }
        }

        if activity.all_idle {
            if let Some(volts) = power.bus_voltage_v() {
                if volts > self.config.over_voltage_v {
                    return Some(DisableReason::OverVoltage);
                }
                if volts < self.config.under_voltage_v {
                    return Some(DisableReason::UnderVoltage);
                }
            }
        }
        None
    }

    /// Record a disable. Returns `true` only for the first one since the
    /// last [`SafetyMonitor::rearm`].
    pub fn latch(&mut self, reason: DisableReason) -> bool {
        if self.latched.is_some() {
            return false;
        }
        self.latched = Some(reason);
        true
    }

    /// Reason of the latched disable, if any.
    #[inline]
    pub fn latched(&self) -> Option<DisableReason> {
        self.latched
    }

    /// Clear the latch and restart the timers.
    pub fn rearm(&mut self) {
        self.latched = None;
        self.last_sample_ms = None;
        self.stopped_since_ms = None;
    }
}
