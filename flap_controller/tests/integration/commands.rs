//! Integration test: host command stream.
//!
//! Show-string with echo and deferred status, unmatched characters,
//! deferred `#` acknowledgement, sensor-test mode, `@` reset and forced
//! full rotation.

use flap_common::state::ModuleState;
use flap_hal::drivers::simulation::SensorFault;

use super::{Harness, of_type, test_config};

#[test]
fn show_string_moves_listed_modules_only() {
    let mut h = Harness::homed(6);
    let idle_steps = h.chain().steps_taken(2);
    h.send("=AB\n");
    h.tick();

    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "move_echo");
    assert_eq!(records[0]["dest"], "AB");

    let modules = h.controller.modules();
    assert_eq!(modules[0].target_flap_index(), 1);
    assert_eq!(modules[1].target_flap_index(), 2);
    assert_eq!(modules[2].target_flap_index(), 0);

    h.settle();
    h.tick();
    let records = h.records();
    let status = of_type(&records, "status");
    assert_eq!(status.len(), 1);
    let entries = status[0]["modules"].as_array().unwrap();
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0]["flap"], "A");
    assert_eq!(entries[1]["flap"], "B");
    assert_eq!(entries[2]["flap"], " ");
    assert_eq!(entries[0]["state"], "normal");
    assert_eq!(entries[0]["count_missed_home"], 0);

    let profile = h.controller.profile().clone();
    assert_eq!(h.chain().position_from_home(0), profile.flap_step(1));
    assert_eq!(h.chain().position_from_home(1), profile.flap_step(2));
    assert_eq!(h.chain().steps_taken(2), idle_steps);
}

#[test]
fn status_waits_until_motion_finishes() {
    let mut h = Harness::homed(6);
    h.send("=ZZZZZZ\n");
    h.tick();
    assert_eq!(of_type(&h.records(), "move_echo").len(), 1);

    // Z is almost a full revolution away; nothing is reported mid-move.
    h.run(50);
    assert!(h.records().is_empty());
    assert!(!h.controller.activity().all_stopped);

    h.settle();
    h.tick();
    assert_eq!(of_type(&h.records(), "status").len(), 1);
}

#[test]
fn unmatched_characters_are_skipped_but_echoed() {
    let mut h = Harness::homed(6);
    h.send("=a?C\n");
    h.tick();

    let records = h.records();
    assert_eq!(records[0]["dest"], "a?C");
    let modules = h.controller.modules();
    assert_eq!(modules[0].target_flap_index(), 0);
    assert_eq!(modules[1].target_flap_index(), 0);
    assert_eq!(modules[2].target_flap_index(), 3);
}

#[test]
fn bytes_beyond_module_count_are_dropped() {
    let mut h = Harness::homed(6);
    h.send("=ABCDEFGHIJ\n");
    h.tick();
    assert_eq!(h.records()[0]["dest"], "ABCDEF");
}

#[test]
fn no_op_acknowledged_once_stopped() {
    let mut h = Harness::homed(6);
    h.send("#");
    h.tick();
    assert!(h.records().is_empty());
    h.tick();
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "no_op");

    h.send("=CC\n#");
    h.tick();
    let records = h.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "move_echo");

    h.settle();
    h.tick();
    let records = h.records();
    let kinds: Vec<_> = records.iter().map(|r| r["type"].as_str().unwrap()).collect();
    assert_eq!(kinds, ["no_op", "status"]);
}

#[test]
fn sensor_test_toggle_dropped_while_homing() {
    let mut h = Harness::booted(&test_config(6));
    h.host.take_output();
    h.run(5);
    // Searching modules are idle but not stopped.
    let activity = h.controller.activity();
    assert!(activity.all_idle && !activity.all_stopped);

    h.send("%");
    h.tick();
    assert_eq!(h.host.pending_input(), 0);
    assert!(!h.controller.sensor_test());

    h.settle();
    h.run(5);
    assert!(of_type(&h.records(), "sensor_test").is_empty());
    assert!(!h.controller.sensor_test());
}

#[test]
fn sensor_test_mirrors_home_sensors_and_ignores_commands() {
    let mut h = Harness::homed(6);
    h.send("%");
    h.tick();
    let records = h.records();
    assert_eq!(records[0]["type"], "sensor_test");
    assert_eq!(records[0]["enabled"], true);
    assert!(h.controller.sensor_test());

    // Every rotor rests on its home arc at flap 0.
    h.tick();
    assert!((0..6).all(|i| h.chain().led_on(i)));

    // The LED follows the sensor on the same tick that reads it.
    h.controller.bus_mut().set_sensor_fault(0, SensorFault::StuckInactive);
    h.tick();
    assert!(!h.chain().led_on(0));
    assert!((1..6).all(|i| h.chain().led_on(i)));
    h.controller.bus_mut().set_sensor_fault(0, SensorFault::None);
    h.tick();
    assert!(h.chain().led_on(0));

    let steps: Vec<u64> = (0..6).map(|i| h.chain().steps_taken(i)).collect();
    h.send("=ZZ\n@#");
    h.run(20);
    assert!(h.records().is_empty());
    assert_eq!(h.controller.modules()[0].target_flap_index(), 0);
    assert!((0..6).all(|i| h.chain().steps_taken(i) == steps[i]));

    h.send("%");
    h.tick();
    let records = h.records();
    assert_eq!(records[0]["enabled"], false);
    h.tick();
    assert!((0..6).all(|i| !h.chain().led_on(i)));
}

#[test]
fn sensor_test_queued_during_move_releases_coils() {
    let mut h = Harness::homed(6);
    h.send("=ZZZZZZ\n");
    h.run(5);
    assert!((0..6).any(|i| h.chain().coils_energized(i)));

    // Held in the serial buffer until the move completes.
    h.send("%");
    h.run_until(2000, |c| c.sensor_test());
    h.tick();
    assert!((0..6).all(|i| !h.chain().coils_energized(i)));

    h.run(300);
    assert!((0..6).all(|i| !h.chain().coils_energized(i)));
    assert!(of_type(&h.records(), "disabled").is_empty());
    assert_eq!(h.controller.disabled_reason(), None);
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));
}

#[test]
fn reset_clears_counters_and_rehomes() {
    let config = test_config(6);
    let mut h = Harness::build(&config, |chain| chain.set_sensor_fault(2, SensorFault::StuckInactive));
    h.boot().unwrap();
    h.settle();
    h.host.take_output();

    h.send("\n");
    h.tick();
    h.tick();
    let records = h.records();
    let status = of_type(&records, "status");
    assert_eq!(status[0]["modules"][2]["state"], "sensor_error");
    assert_eq!(status[0]["modules"][2]["count_missed_home"], 1);

    h.controller.bus_mut().set_sensor_fault(2, SensorFault::None);
    h.send("@");
    h.tick();
    assert!(h.states().iter().all(|&s| s == ModuleState::LookForHome));
    assert_eq!(h.controller.modules()[2].count_missed_home(), 0);

    h.settle();
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));
    assert_eq!(h.controller.modules()[2].count_missed_home(), 0);
}

#[test]
fn forced_full_rotation_spins_unchanged_modules() {
    let mut config = test_config(6);
    config.display.force_full_rotation = true;
    let mut h = Harness::homed_with(&config);

    let before: Vec<u64> = (0..6).map(|i| h.chain().steps_taken(i)).collect();
    h.send("=  \n");
    h.tick();
    h.settle();
    assert_eq!(h.chain().steps_taken(0) - before[0], 200);
    assert_eq!(h.chain().steps_taken(1) - before[1], 200);
    assert_eq!(h.chain().steps_taken(2), before[2]);
    assert_eq!(h.chain().position_from_home(0), 0);
}

#[test]
fn unchanged_target_without_force_does_not_move() {
    let mut h = Harness::homed(6);
    let before = h.chain().steps_taken(0);
    h.send("=  \n");
    h.run(3);
    assert_eq!(h.chain().steps_taken(0), before);
    let records = h.records();
    assert_eq!(of_type(&records, "status").len(), 1);
}
