//! # Split-flap Controller
//!
//! Real-time core of a multi-module split-flap display. A single control
//! thread clocks the whole shift-register chain once per tick, advances one
//! state machine per module, supervises supply current and voltage, and
//! interprets a byte-oriented command stream from the host. Observers read
//! a mutex-guarded status snapshot.
//!
//! ## Layers
//!
//! 1. **Controller** - boot sequence and the per-tick body ([`controller`])
//! 2. **Module** - homing, rotation and fault recovery ([`state`])
//! 3. **Safety** - over/unexpected current, voltage band ([`safety`])
//! 4. **Self-test** - loopback wiring check at boot ([`selftest`])
//!
//! ## Allocation
//!
//! Bus images, module array and status snapshot are sized once at
//! construction. The tick allocates only when a command produces a host
//! response.

pub mod command;
pub mod controller;
pub mod cycle;
pub mod error;
pub mod safety;
pub mod selftest;
pub mod state;
pub mod status;
