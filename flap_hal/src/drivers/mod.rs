//! HAL driver implementations.
//!
//! - [`simulation`] - Software shift-register chain with simulated rotors,
//!   home sensors, loopback wiring and power telemetry
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `BusDriver` (and `PowerSense` if the board has a sensor)
//! 3. Add it to [`DRIVER_NAMES`] and the binary's driver selection

pub mod simulation;

/// Names accepted by the controller binary's `--driver` flag.
pub const DRIVER_NAMES: &[&str] = &["simulation"];
