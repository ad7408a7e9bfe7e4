//! Integration test: electrical safety disables and re-arming.
//!
//! 1. Over-current while moving → every module `Disabled`, coils off
//! 2. Current drawn while stopped → unexpected-current disable
//! 3. Supply voltage outside the band while idle
//! 4. `@` re-arms and re-homes

use flap_common::protocol::DisableReason;
use flap_common::state::ModuleState;

use super::{Harness, of_type};

fn assert_all_disabled(h: &Harness) {
    assert!(h.states().iter().all(|&s| s == ModuleState::Disabled));
    for i in 0..h.controller.modules().len() {
        assert!(!h.chain().coils_energized(i));
    }
}

#[test]
fn over_current_disables_every_module_once() {
    let mut h = Harness::homed(6);
    h.send("=ZZZZZZ\n");
    h.run(20);
    h.power.set_current_override(Some(10_000.0));
    h.run_until(200, |c| c.disabled_reason().is_some());

    assert_eq!(h.controller.disabled_reason(), Some(DisableReason::OverCurrent));
    assert_all_disabled(&h);

    h.run(500);
    let records = h.records();
    let disabled = of_type(&records, "disabled");
    assert_eq!(disabled.len(), 1);
    assert_eq!(disabled[0]["reason"], "over_current");
    assert_all_disabled(&h);
}

#[test]
fn motors_stay_put_after_disable() {
    let mut h = Harness::homed(6);
    h.send("=ZZZZZZ\n");
    h.run(20);
    h.power.set_current_override(Some(10_000.0));
    h.run_until(200, |c| c.disabled_reason().is_some());

    let steps: Vec<u64> = (0..6).map(|i| h.chain().steps_taken(i)).collect();
    h.run(300);
    assert!((0..6).all(|i| h.chain().steps_taken(i) == steps[i]));
}

#[test]
fn current_while_stopped_is_unexpected() {
    let mut h = Harness::homed(6);
    // Well below the 1.5 A over-current limit for six modules.
    h.power.set_current_override(Some(5.0));
    h.run_until(300, |c| c.disabled_reason().is_some());
    assert_eq!(
        h.controller.disabled_reason(),
        Some(DisableReason::UnexpectedCurrent)
    );
    assert_eq!(of_type(&h.records(), "disabled")[0]["reason"], "unexpected_current");
    assert_all_disabled(&h);
}

#[test]
fn quiescent_draw_never_disables() {
    let mut h = Harness::homed(6);
    h.run(2_000);
    assert_eq!(h.controller.disabled_reason(), None);
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));
}

#[test]
fn under_voltage_while_idle() {
    let mut h = Harness::homed(6);
    h.power.set_voltage_override(Some(Some(9.0)));
    h.tick();
    assert_eq!(h.controller.disabled_reason(), Some(DisableReason::UnderVoltage));
    assert_all_disabled(&h);
}

#[test]
fn voltage_ignored_while_moving() {
    let mut h = Harness::homed(6);
    h.send("=ZZZZZZ\n");
    h.tick();
    h.power.set_voltage_override(Some(Some(15.0)));
    h.run(20);
    assert_eq!(h.controller.disabled_reason(), None);

    h.settle();
    h.tick();
    assert_eq!(h.controller.disabled_reason(), Some(DisableReason::OverVoltage));
}

#[test]
fn missing_voltage_reading_is_skipped() {
    let mut h = Harness::homed(6);
    h.power.set_voltage_override(Some(None));
    h.run(500);
    assert_eq!(h.controller.disabled_reason(), None);
}

#[test]
fn reset_rearms_after_disable() {
    let mut h = Harness::homed(6);
    h.power.set_voltage_override(Some(Some(9.0)));
    h.tick();
    assert_all_disabled(&h);

    h.power.set_voltage_override(None);
    h.send("@");
    h.tick();
    assert_eq!(h.controller.disabled_reason(), None);
    h.settle();
    assert!(h.states().iter().all(|&s| s == ModuleState::Normal));

    h.power.set_current_override(Some(10_000.0));
    h.run_until(200, |c| c.disabled_reason().is_some());
    let records = h.records();
    let reasons: Vec<_> = of_type(&records, "disabled")
        .iter()
        .map(|r| r["reason"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(reasons, ["under_voltage", "over_current"]);
}
