//! Host protocol records.
//!
//! Every record is a single-line JSON object tagged by `"type"`, terminated
//! by `\n` on the wire. Inbound traffic is raw bytes and is handled by the
//! controller's command interpreter.

use serde::{Deserialize, Serialize};

use crate::state::ModuleState;

/// Inbound control bytes.
pub mod bytes {
    /// Toggle sensor-test mode (only while every module is stopped).
    pub const SENSOR_TEST: u8 = b'%';
    /// Reset fault counters and re-home every module.
    pub const RESET: u8 = b'@';
    /// Request a `no_op` acknowledgement once everything is stopped.
    pub const NO_OP: u8 = b'#';
    /// Clear the receive buffer.
    pub const CLEAR: u8 = b'=';
    /// Dispatch the receive buffer as a show-string command.
    pub const DISPATCH: u8 = b'\n';
}

/// Cause of a global disable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// Total current above the per-module limit times module count.
    OverCurrent,
    /// Current drawn while every module has been stopped past the grace period.
    UnexpectedCurrent,
    /// Bus voltage above the operating band.
    OverVoltage,
    /// Bus voltage below the operating band.
    UnderVoltage,
}

impl std::fmt::Display for DisableReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OverCurrent => "Over current",
            Self::UnexpectedCurrent => "Unexpected current",
            Self::OverVoltage => "Over voltage",
            Self::UnderVoltage => "Under voltage",
        })
    }
}

/// One module's entry in a status dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleReport {
    /// Mechanical state.
    pub state: ModuleState,
    /// Symbol currently shown.
    pub flap: char,
    /// Homes expected but not seen.
    pub count_missed_home: u32,
    /// Homes seen outside the expected window.
    pub count_unexpected_home: u32,
}

/// Records sent to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Emitted once at startup.
    Init {
        /// Modules on the bus.
        num_modules: usize,
    },
    /// Sensor-test mode toggled.
    SensorTest {
        /// New mode.
        enabled: bool,
    },
    /// Deferred acknowledgement of `#`.
    NoOp,
    /// Show-string command accepted; motion has started.
    MoveEcho {
        /// Characters received, matched or not.
        dest: String,
    },
    /// Full status, emitted once motion has finished.
    Status {
        /// One entry per module.
        modules: Vec<ModuleReport>,
    },
    /// Self-test wiring mismatch.
    LoopbackError {
        /// Channel being driven, or `None` for the all-off check.
        driven: Option<u8>,
        /// Channel whose input disagreed.
        channel: u8,
    },
    /// Global disable latched.
    Disabled {
        /// Why.
        reason: DisableReason,
    },
}

impl Response {
    /// Encode as a single JSON line without the trailing newline.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
