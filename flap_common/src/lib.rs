//! Split-flap common library
//!
//! Shared types for every crate in the workspace: configuration loading,
//! the display alphabet, shift-register bit layouts, module state and status
//! snapshot types, and the host protocol records.
//!
//! # Module Structure
//!
//! - [`config`] - TOML configuration types and loader
//! - [`alphabet`] - Display symbol table
//! - [`layout`] - Bus bit-layout strategies (module index → byte + mask)
//! - [`state`] - Module state enum and status snapshot
//! - [`protocol`] - Newline-terminated JSON records sent to the host
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use flap_common::prelude::*;
//!
//! let alphabet = Alphabet::default();
//! assert_eq!(alphabet.find(b'A'), Some(1));
//! ```

pub mod alphabet;
pub mod config;
pub mod layout;
pub mod prelude;
pub mod protocol;
pub mod state;

/// Upper bound on the number of modules a single controller drives.
///
/// Sizes every fixed-capacity buffer (status snapshot, receive buffer).
pub const MAX_MODULES: usize = 96;

static_assertions::const_assert!(MAX_MODULES % 6 == 0);
static_assertions::const_assert!(MAX_MODULES <= u8::MAX as usize);
