//! Integration test: boot sequence and homing.
//!
//! 1. `init` record, loopback self-test, LED acknowledgement
//! 2. Every module homes and settles on its target
//! 3. A wiring fault holds the controller without moving anything

use flap_common::config::{ConfigLoader, FlapConfig};
use flap_common::state::ModuleState;
use flap_controller::controller::{Controller, Mode, Peripherals, led_flash_on};
use flap_controller::error::ControllerError;
use flap_controller::status::StatusCache;
use flap_hal::drivers::simulation::{SensorFault, SimulatedChain};
use flap_hal::serial::MemorySerial;
use flap_hal::watchdog::CountingWatchdog;
use std::fs;
use tempfile::TempDir;

use super::{Harness, classic_config, of_type, test_config};

#[test]
fn boot_announces_and_homes_every_module() {
    let mut h = Harness::booted(&test_config(6));
    let records = h.records();
    assert_eq!(records[0]["type"], "init");
    assert_eq!(records[0]["num_modules"], 6);
    assert_eq!(h.controller.mode(), Mode::Running);
    assert!(h.states().iter().all(|&s| s == ModuleState::LookForHome));

    h.settle();
    h.tick();
    for i in 0..6 {
        let m = &h.controller.modules()[i];
        assert_eq!(m.state(), ModuleState::Normal);
        assert_eq!(m.current_flap_index(), 0);
        assert_eq!(h.chain().position_from_home(i), 0);
        assert!(!h.chain().coils_energized(i));
    }
    assert!(h.records().is_empty());
}

#[test]
fn watchdog_fed_every_tick() {
    let mut h = Harness::booted(&test_config(6));
    let after_boot = h.watchdog.feeds();
    assert!(after_boot > 0);
    h.run(250);
    assert_eq!(h.watchdog.feeds(), after_boot + 250);
}

#[test]
fn miswired_loopback_holds_in_diagnostics() {
    let mut h = Harness::build(&test_config(6), |chain| chain.miswire_loopback(0, 1));
    let err = h.boot().unwrap_err();
    assert!(matches!(err, ControllerError::SelfTestFailed { faults: 2 }));
    assert_eq!(h.controller.mode(), Mode::DiagnosticHold);

    let records = h.records();
    let faults = of_type(&records, "loopback_error");
    assert_eq!(faults.len(), 2);
    assert_eq!(faults[0]["driven"], 0);
    assert_eq!(faults[0]["channel"], 0);
    assert_eq!(faults[1]["driven"], 0);
    assert_eq!(faults[1]["channel"], 1);

    let feeds = h.watchdog.feeds();
    h.send("=AB\n");
    h.run(500);
    assert_eq!(h.watchdog.feeds(), feeds + 500);
    assert!(h.records().is_empty());
    for i in 0..6 {
        assert_eq!(h.chain().steps_taken(i), 0);
    }
    assert!(h.states().iter().all(|&s| s == ModuleState::LookForHome));
}

#[test]
fn shorted_loopback_input_is_reported_with_null_driver() {
    let mut h = Harness::build(&test_config(6), |chain| chain.short_loopback(1));
    assert!(h.boot().is_err());
    let records = h.records();
    let faults = of_type(&records, "loopback_error");
    assert!(
        faults
            .iter()
            .any(|f| f["driven"].is_null() && f["channel"] == 1)
    );
}

#[test]
fn classic_layout_boots_without_loopbacks() {
    let mut h = Harness::booted(&classic_config(5));
    h.settle();
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));
}

#[test]
fn faulted_module_blinks_its_state() {
    let config = test_config(6);
    let mut h = Harness::build(&config, |chain| chain.set_sensor_fault(2, SensorFault::StuckInactive));
    h.boot().unwrap();
    h.settle();
    assert_eq!(h.controller.modules()[2].state(), ModuleState::SensorError);
    assert_eq!(h.controller.modules()[2].count_missed_home(), 1);

    let mut lit = 0;
    for _ in 0..3200 {
        h.tick();
        assert_eq!(
            h.chain().led_on(2),
            led_flash_on(h.now_ms, ModuleState::SensorError)
        );
        assert!(!h.chain().led_on(0));
        lit += usize::from(h.chain().led_on(2));
    }
    // Two 200 ms blinks per 3.2 s cycle.
    assert_eq!(lit, 400);
}

#[test]
fn startup_from_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("splitflap.toml");
    fs::write(
        &path,
        r#"
[shared]
service_name = "lobby"

[display]
num_modules = 6
layout = "chainlink"

[motion]
steps_per_revolution = 200
home_margin_steps = 8
ramp_periods = [3, 2, 1]
"#,
    )
    .unwrap();

    let config = FlapConfig::load_validated(&path).unwrap();
    assert_eq!(config.shared.service_name, "lobby");
    let mut h = Harness::booted(&config);
    assert_eq!(h.records()[0]["num_modules"], 6);
    h.settle();
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));
}

#[test]
fn invalid_module_count_is_rejected_before_boot() {
    let config = FlapConfig::from_toml("[display]\nnum_modules = 7\n").unwrap();
    let chain = SimulatedChain::new(config.display.layout, 7, 2048);
    let io = Peripherals {
        power: chain.power_sensor(),
        bus: chain,
        serial: MemorySerial::new(),
        watchdog: CountingWatchdog::new(),
    };
    let result = Controller::new(&config, io, StatusCache::new(7));
    assert!(matches!(result, Err(ControllerError::Config(_))));
}

#[test]
fn mismatched_status_cache_is_rejected() {
    let config = test_config(6);
    let chain = SimulatedChain::new(config.display.layout, 6, 200);
    let io = Peripherals {
        power: chain.power_sensor(),
        bus: chain,
        serial: MemorySerial::new(),
        watchdog: CountingWatchdog::new(),
    };
    assert!(Controller::new(&config, io, StatusCache::new(12)).is_err());
}
