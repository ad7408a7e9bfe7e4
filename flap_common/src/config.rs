//! Configuration loading traits and types.
//!
//! The controller is configured from a single TOML file. Every section has
//! defaults, so an empty file describes a 12-module chainlink display with
//! the stock 40-flap alphabet.
//!
//! # Usage
//!
//! ```rust,no_run
//! use flap_common::config::{ConfigError, ConfigLoader, FlapConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = FlapConfig::load(Path::new("splitflap.toml"))?;
//!     config.validate()?;
//!     println!("Modules: {}", config.display.num_modules);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::MAX_MODULES;
use crate::alphabet::Alphabet;
use crate::layout::BusLayout;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "splitflap-lobby"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Controller instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    "splitflap".to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Display geometry and host-visible behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Number of physical modules on the bus.
    pub num_modules: usize,
    /// Symbols on the flaps, in rotor order.
    pub alphabet: Alphabet,
    /// Shift-register wiring topology.
    pub layout: BusLayout,
    /// Re-issue a full revolution even when the target is unchanged.
    pub force_full_rotation: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            num_modules: 12,
            alphabet: Alphabet::default(),
            layout: BusLayout::Chainlink,
            force_full_rotation: false,
        }
    }
}

/// Per-module mechanics shared by every module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MotionConfig {
    /// Motor steps for one full drum revolution.
    pub steps_per_revolution: u32,
    /// Tolerance either side of step 0 where the home edge is expected.
    pub home_margin_steps: u32,
    /// Revolutions searched in `LookForHome` before giving up.
    pub max_search_revolutions: u32,
    /// Consecutive missed/unexpected homes tolerated before `SensorError`.
    pub home_retry_budget: u32,
    /// Ticks between motor steps for each acceleration stage (fastest last).
    pub ramp_periods: Vec<u32>,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            steps_per_revolution: 2048,
            home_margin_steps: 60,
            max_search_revolutions: 3,
            home_retry_budget: 3,
            ramp_periods: vec![12, 8, 6, 5, 4, 4, 3, 3, 2, 2],
        }
    }
}

/// Electrical protection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Over-current limit per module [mA]; multiplied by the module count.
    pub over_current_ma_per_module: f32,
    /// Current drawn while everything is stopped that counts as a stall [mA].
    pub unexpected_current_ma: f32,
    /// How long all modules must be stopped before idle current is judged [ms].
    pub stopped_grace_ms: u64,
    /// Minimum spacing between current samples [ms].
    pub sample_interval_ms: u64,
    /// Upper edge of the operating voltage band [V].
    pub over_voltage_v: f32,
    /// Lower edge of the operating voltage band [V].
    pub under_voltage_v: f32,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            over_current_ma_per_module: 250.0,
            unexpected_current_ma: 3.0,
            stopped_grace_ms: 100,
            sample_interval_ms: 100,
            over_voltage_v: 14.0,
            under_voltage_v: 10.0,
        }
    }
}

/// Loop pacing and supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    /// Control loop period [µs].
    pub tick_us: u64,
    /// Watchdog starvation limit [ms].
    pub watchdog_timeout_ms: u64,
    /// Observer thread status read period [ms].
    pub status_report_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_us: 1000,
            watchdog_timeout_ms: 2000,
            status_report_ms: 500,
        }
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlapConfig {
    /// Shared service settings.
    pub shared: SharedConfig,
    /// Display geometry.
    pub display: DisplayConfig,
    /// Module mechanics.
    pub motion: MotionConfig,
    /// Electrical protection.
    pub safety: SafetyConfig,
    /// Loop pacing.
    pub timing: TimingConfig,
}

impl FlapConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let n = self.display.num_modules;
        if n == 0 || n > MAX_MODULES {
            return Err(ConfigError::ValidationError(format!(
                "num_modules must be within 1..={MAX_MODULES}, got {n}"
            )));
        }
        if let Some(group) = self.display.layout.group_size() {
            if n % group != 0 {
                return Err(ConfigError::ValidationError(format!(
                    "{:?} layout needs a multiple of {group} modules, got {n}",
                    self.display.layout
                )));
            }
        }

        let m = &self.motion;
        if m.steps_per_revolution < 4 {
            return Err(ConfigError::ValidationError(
                "steps_per_revolution must be at least 4".to_string(),
            ));
        }
        if self.display.alphabet.len() as u32 > m.steps_per_revolution {
            return Err(ConfigError::ValidationError(format!(
                "alphabet of {} symbols does not fit {} steps",
                self.display.alphabet.len(),
                m.steps_per_revolution
            )));
        }
        if m.home_margin_steps * 2 >= m.steps_per_revolution {
            return Err(ConfigError::ValidationError(
                "home_margin_steps must cover less than half a revolution".to_string(),
            ));
        }
        if m.max_search_revolutions == 0 {
            return Err(ConfigError::ValidationError(
                "max_search_revolutions must be positive".to_string(),
            ));
        }
        if m.ramp_periods.is_empty() || m.ramp_periods.contains(&0) {
            return Err(ConfigError::ValidationError(
                "ramp_periods must be non-empty with every period >= 1".to_string(),
            ));
        }

        let s = &self.safety;
        if s.under_voltage_v >= s.over_voltage_v {
            return Err(ConfigError::ValidationError(format!(
                "voltage band is empty: under {} >= over {}",
                s.under_voltage_v, s.over_voltage_v
            )));
        }
        if s.over_current_ma_per_module <= 0.0 || s.unexpected_current_ma < 0.0 {
            return Err(ConfigError::ValidationError(
                "current thresholds must be positive".to_string(),
            ));
        }

        let t = &self.timing;
        if t.tick_us == 0 || t.watchdog_timeout_ms == 0 || t.status_report_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timing intervals must be positive".to_string(),
            ));
        }
        if t.watchdog_timeout_ms * 1000 <= t.tick_us {
            return Err(ConfigError::ValidationError(
                "watchdog_timeout_ms must exceed one tick".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from TOML and validate in one step.
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }
}

/// Trait for loading configuration from TOML files.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from an in-memory TOML document.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation: any serde-deserializable struct can be loaded.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
