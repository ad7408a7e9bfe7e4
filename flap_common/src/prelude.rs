//! Common re-exports for convenience.
//!
//! ```rust
//! use flap_common::prelude::*;
//! ```

pub use crate::MAX_MODULES;
pub use crate::alphabet::Alphabet;
pub use crate::config::{
    ConfigError, ConfigLoader, DisplayConfig, FlapConfig, LogLevel, MotionConfig, SafetyConfig,
    SharedConfig, TimingConfig,
};
pub use crate::layout::{BitAddr, BusBuffers, BusLayout, BusMap, COIL_PATTERNS, Nibble};
pub use crate::protocol::{DisableReason, ModuleReport, Response};
pub use crate::state::{ModuleState, ModuleStatus, StatusSnapshot};
