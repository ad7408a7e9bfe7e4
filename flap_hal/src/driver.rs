//! HAL traits and error types.
//!
//! This module defines:
//! - `BusDriver` trait - atomic shift-register transfer
//! - `PowerSense` trait - current/voltage telemetry
//! - `SerialPort` trait - host byte stream
//! - `Watchdog` trait - per-tick liveness check
//! - `HalError` enum - error types for HAL operations

use std::time::Duration;
use thiserror::Error;

/// Error types for HAL operations.
#[derive(Debug, Clone, Error)]
pub enum HalError {
    /// Driver initialization failed
    #[error("Initialization failed: {0}")]
    InitFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Hardware communication error
    #[error("Hardware communication error: {0}")]
    CommunicationError(String),

    /// Host link error
    #[error("Serial error: {0}")]
    SerialError(String),
}

/// Full-duplex shift-register chain.
///
/// # Timing Contracts
///
/// | Operation          | Max Duration   | RT Constraint |
/// |--------------------|----------------|---------------|
/// | `transfer()`       | a few µs       | **HARD**      |
/// | `enable_outputs()` | bounded        | None (boot)   |
/// | `pause()`          | as requested   | None (boot)   |
pub trait BusDriver: Send {
    /// Returns the driver's unique identifier (e.g., "simulation").
    fn name(&self) -> &'static str;

    /// Clock `outbound` into the output registers while latching the input
    /// registers into `inbound`.
    ///
    /// Inputs reflect the state latched *before* this exchange, so an output
    /// becomes visible on the inputs only after a second transfer.
    ///
    /// # Errors
    /// Returns `HalError::CommunicationError` if the exchange failed; the
    /// caller keeps its previous input image.
    fn transfer(&mut self, outbound: &[u8], inbound: &mut [u8]) -> Result<(), HalError>;

    /// Drive the output-enable line once the registers hold a defined state.
    fn enable_outputs(&mut self) -> Result<(), HalError> {
        Ok(())
    }

    /// Hold the bus for a fixed time. Only used outside the control loop.
    fn pause(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Aggregate electrical telemetry.
///
/// `None` means no reading is available; the corresponding safety check is
/// skipped for that evaluation.
pub trait PowerSense: Send {
    /// Total motor supply current [mA].
    fn current_ma(&mut self) -> Option<f32>;

    /// Motor supply bus voltage [V].
    fn bus_voltage_v(&mut self) -> Option<f32>;
}

/// Board without a power sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPowerSense;

impl PowerSense for NoPowerSense {
    fn current_ma(&mut self) -> Option<f32> {
        None
    }

    fn bus_voltage_v(&mut self) -> Option<f32> {
        None
    }
}

/// Byte-oriented host link.
pub trait SerialPort: Send {
    /// Next received byte, without blocking.
    fn read_byte(&mut self) -> Option<u8>;

    /// Send one record; the port appends the line terminator.
    fn write_line(&mut self, line: &str) -> Result<(), HalError>;
}

/// Liveness check serviced once per control tick.
pub trait Watchdog: Send {
    /// Reset the starvation timer.
    fn feed(&mut self);
}
