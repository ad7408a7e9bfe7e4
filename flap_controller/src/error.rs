//! Controller error type.
//!
//! Only boot and setup paths return errors. A running tick never fails:
//! bus and telemetry problems are logged and the tick completes.

use flap_common::config::ConfigError;
use flap_hal::HalError;
use thiserror::Error;

/// Errors raised while bringing the controller up.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration could not be loaded or failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A hardware collaborator failed during boot.
    #[error(transparent)]
    Hal(#[from] HalError),

    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Loopback self-test found wiring faults; the controller holds.
    #[error("loopback self-test failed with {faults} fault(s)")]
    SelfTestFailed {
        /// Number of mismatching inputs.
        faults: usize,
    },

    /// Requested driver is not built in.
    #[error("unknown driver '{0}'")]
    UnknownDriver(String),
}
