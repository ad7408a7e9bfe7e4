//! Module state and the status snapshot shared with observers.

use serde::{Deserialize, Serialize};

use crate::MAX_MODULES;

/// Per-module mechanical state.
///
/// Exactly one state is active at a time; only the module state machine
/// changes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// Position known; servoing to the target.
    Normal,
    /// Rotating until the home sensor edge is found.
    #[default]
    LookForHome,
    /// Home sensor behaved inconsistently; rotor held.
    SensorError,
    /// Unrecoverable fault; rotor held.
    Panic,
    /// Forced off by the safety monitor.
    Disabled,
}

impl ModuleState {
    /// Protocol name of the state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::LookForHome => "look_for_home",
            Self::SensorError => "sensor_error",
            Self::Panic => "panic",
            Self::Disabled => "disabled",
        }
    }

    /// Number of LED blinks per flash cycle signalling this state.
    ///
    /// Independent of declaration order; `Normal` never blinks.
    pub const fn flash_count(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::LookForHome => 1,
            Self::SensorError => 2,
            Self::Panic => 3,
            Self::Disabled => 4,
        }
    }

    /// States in which the rotor is held de-energised regardless of target.
    pub const fn is_held(self) -> bool {
        matches!(self, Self::SensorError | Self::Panic | Self::Disabled)
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observer-visible status of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// Flap currently shown.
    pub flap_index: u8,
    /// Mechanical state.
    pub state: ModuleState,
}

/// Point-in-time copy of every module's status.
///
/// Plain `Copy` value with a fixed capacity so publishing and reading never
/// allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    modules: [ModuleStatus; MAX_MODULES],
    count: u8,
}

impl StatusSnapshot {
    /// Snapshot of `count` modules, all in their boot state.
    pub fn new(count: usize) -> Self {
        Self {
            modules: [ModuleStatus::default(); MAX_MODULES],
            count: count.min(MAX_MODULES) as u8,
        }
    }

    /// Number of modules described.
    #[inline]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    /// True when describing no modules.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Active entries.
    #[inline]
    pub fn modules(&self) -> &[ModuleStatus] {
        &self.modules[..self.len()]
    }

    /// Mutable active entries.
    #[inline]
    pub fn modules_mut(&mut self) -> &mut [ModuleStatus] {
        let n = self.len();
        &mut self.modules[..n]
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::new(0)
    }
}
