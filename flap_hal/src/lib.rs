//! # Split-flap HAL
//!
//! Hardware abstraction for the controller core. The control loop talks to
//! four collaborators, each behind a trait defined in [`driver`]:
//!
//! - [`BusDriver`] - one full-duplex shift-register exchange per call
//! - [`PowerSense`] - aggregate current and bus voltage telemetry
//! - [`SerialPort`] - non-blocking byte input, line output to the host
//! - [`Watchdog`] - liveness check fed once per tick
//!
//! # Module Structure
//!
//! - [`driver`] - Traits and `HalError`
//! - [`drivers`] - Driver implementations (simulation)
//! - [`serial`] - stdio and in-memory serial ports
//! - [`watchdog`] - Software and counting watchdogs

#![deny(missing_docs)]

pub mod driver;
pub mod drivers;
pub mod serial;
pub mod watchdog;

pub use crate::driver::{BusDriver, HalError, NoPowerSense, PowerSense, SerialPort, Watchdog};
