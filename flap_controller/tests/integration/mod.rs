//! Shared harness for the integration tests.

mod commands;
mod safety_stop;
mod startup;
mod status_cache;

use flap_common::config::FlapConfig;
use flap_common::layout::BusLayout;
use flap_common::state::ModuleState;
use flap_controller::controller::{Controller, Peripherals};
use flap_controller::error::ControllerError;
use flap_controller::status::StatusCache;
use flap_hal::drivers::simulation::{SimulatedChain, SimulatedPower};
use flap_hal::serial::MemorySerial;
use flap_hal::watchdog::CountingWatchdog;
use serde_json::Value;

pub type SimController = Controller<SimulatedChain, SimulatedPower, MemorySerial, CountingWatchdog>;

/// Small, fast drum: 200 steps per revolution and a three-stage ramp.
pub fn test_config(num_modules: usize) -> FlapConfig {
    let mut config = FlapConfig::default();
    config.display.num_modules = num_modules;
    config.motion.steps_per_revolution = 200;
    config.motion.home_margin_steps = 8;
    config.motion.ramp_periods = vec![3, 2, 1];
    config
}

/// Controller plus the host-side handles of its collaborators.
pub struct Harness {
    pub controller: SimController,
    pub host: MemorySerial,
    pub power: SimulatedPower,
    pub watchdog: CountingWatchdog,
    pub now_ms: u64,
}

impl Harness {
    /// Build without booting; `wire` may inject chain faults first.
    pub fn build(config: &FlapConfig, wire: impl FnOnce(&mut SimulatedChain)) -> Self {
        let mut chain = SimulatedChain::new(
            config.display.layout,
            config.display.num_modules,
            config.motion.steps_per_revolution,
        );
        wire(&mut chain);
        let power = chain.power_sensor();
        let host = MemorySerial::new();
        let watchdog = CountingWatchdog::new();
        let io = Peripherals {
            bus: chain,
            power: power.clone(),
            serial: host.clone(),
            watchdog: watchdog.clone(),
        };
        let cache = StatusCache::new(config.display.num_modules);
        let controller = Controller::new(config, io, cache).expect("valid test config");
        Self {
            controller,
            host,
            power,
            watchdog,
            now_ms: 0,
        }
    }

    /// Build and boot; the boot must pass.
    pub fn booted(config: &FlapConfig) -> Self {
        let mut h = Self::build(config, |_| {});
        h.boot().expect("boot");
        h
    }

    /// Booted and homed, with the boot output drained.
    pub fn homed(num_modules: usize) -> Self {
        Self::homed_with(&test_config(num_modules))
    }

    pub fn homed_with(config: &FlapConfig) -> Self {
        let mut h = Self::booted(config);
        h.settle();
        h.host.take_output();
        h
    }

    pub fn boot(&mut self) -> Result<(), ControllerError> {
        self.controller.boot()
    }

    pub fn tick(&mut self) {
        self.now_ms += 1;
        self.controller.tick(self.now_ms);
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Tick until `done` holds; panics after `max_ticks`.
    pub fn run_until(&mut self, max_ticks: usize, done: impl Fn(&SimController) -> bool) {
        for _ in 0..max_ticks {
            self.tick();
            if done(&self.controller) {
                return;
            }
        }
        panic!("condition not reached within {max_ticks} ticks");
    }

    /// Tick until every module is stopped and none is searching for home.
    pub fn settle(&mut self) {
        self.run_until(10_000, |c| {
            c.modules()
                .iter()
                .all(|m| m.is_stopped() && m.state() != ModuleState::LookForHome)
        });
    }

    pub fn send(&self, text: &str) {
        self.host.push_input(text);
    }

    /// Drain the host-bound records, parsed.
    pub fn records(&self) -> Vec<Value> {
        self.host
            .take_output()
            .iter()
            .map(|line| serde_json::from_str(line).expect("one JSON object per line"))
            .collect()
    }

    pub fn chain(&self) -> &SimulatedChain {
        self.controller.bus()
    }

    pub fn states(&self) -> Vec<ModuleState> {
        self.controller.modules().iter().map(|m| m.state()).collect()
    }
}

/// Records of one `type`.
pub fn of_type<'a>(records: &'a [Value], kind: &str) -> Vec<&'a Value> {
    records.iter().filter(|r| r["type"] == kind).collect()
}

pub fn classic_config(num_modules: usize) -> FlapConfig {
    let mut config = test_config(num_modules);
    config.display.layout = BusLayout::Classic;
    config
}
