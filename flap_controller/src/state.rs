//! Module state machine root.
//!
//! - [`profile`] - drum geometry and acceleration ramp shared by all modules
//! - [`module`] - per-module homing/rotation/fault state machine

pub mod module;
pub mod profile;

pub use module::Module;
pub use profile::MotionProfile;
