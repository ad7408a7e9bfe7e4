//! Simulated power telemetry.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::driver::PowerSense;

/// Current drawn by one module with its coils energised.
pub const MA_PER_ENERGIZED_MODULE: f32 = 150.0;

/// Quiescent draw of the board electronics.
const QUIESCENT_MA: f32 = 0.5;

const NOMINAL_BUS_V: f32 = 12.0;

#[derive(Debug, Default)]
pub(super) struct Telemetry {
    pub(super) energized: usize,
    current_override: Option<f32>,
    voltage_override: Option<Option<f32>>,
}

/// Power sensor backed by a [`super::SimulatedChain`]'s coil activity.
///
/// Clones share the same telemetry, so a test can keep a handle to inject
/// readings while the controller owns another.
#[derive(Debug, Clone)]
pub struct SimulatedPower {
    telemetry: Arc<Mutex<Telemetry>>,
}

impl SimulatedPower {
    pub(super) fn attach(telemetry: Arc<Mutex<Telemetry>>) -> Self {
        Self { telemetry }
    }

    /// Standalone sensor not attached to any chain.
    pub fn detached() -> Self {
        Self::attach(Arc::new(Mutex::new(Telemetry::default())))
    }

    /// Report `ma` regardless of coil activity; `None` restores the model.
    pub fn set_current_override(&self, ma: Option<f32>) {
        self.telemetry.lock().current_override = ma;
    }

    /// Force the bus voltage reading. `Some(None)` simulates a missing
    /// reading; `None` restores the nominal supply.
    pub fn set_voltage_override(&self, volts: Option<Option<f32>>) {
        self.telemetry.lock().voltage_override = volts;
    }

    /// Modules whose coils were energised by the last transfer.
    pub fn energized_modules(&self) -> usize {
        self.telemetry.lock().energized
    }
}

impl PowerSense for SimulatedPower {
    fn current_ma(&mut self) -> Option<f32> {
        let t = self.telemetry.lock();
        Some(
            t.current_override
                .unwrap_or(t.energized as f32 * MA_PER_ENERGIZED_MODULE + QUIESCENT_MA),
        )
    }

    fn bus_voltage_v(&mut self) -> Option<f32> {
        self.telemetry
            .lock()
            .voltage_override
            .unwrap_or(Some(NOMINAL_BUS_V))
    }
}
