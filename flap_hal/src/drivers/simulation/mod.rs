//! Simulation driver module.
//!
//! Provides a software shift-register chain for development and testing
//! without physical hardware. [`SimulatedChain`] implements `BusDriver`;
//! [`SimulatedPower`] implements `PowerSense` and reads the chain's coil
//! activity through a shared telemetry block.

mod chain;
mod power;

pub use chain::{SensorFault, SimulatedChain};
pub use power::{SimulatedPower, MA_PER_ENERGIZED_MODULE};
