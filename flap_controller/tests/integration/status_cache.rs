//! Integration test: observer view of the status cache.

use flap_common::state::ModuleState;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use super::Harness;

#[test]
fn cache_tracks_module_states() {
    let mut h = Harness::homed(6);
    let cache = h.controller.status_cache();
    let snapshot = cache.read();
    assert_eq!(snapshot.len(), 6);
    for (status, module) in snapshot.modules().iter().zip(h.controller.modules()) {
        assert_eq!(*status, module.status());
        assert_eq!(status.state, ModuleState::Normal);
    }

    h.send("=ABC\n");
    h.tick();
    h.settle();
    let snapshot = cache.read();
    assert_eq!(snapshot.modules()[0].flap_index, 1);
    assert_eq!(snapshot.modules()[2].flap_index, 3);
}

#[test]
fn quiet_ticks_do_not_republish() {
    let mut h = Harness::homed(6);
    let cache = h.controller.status_cache();
    let (_, generation) = cache.read_versioned();
    h.run(100);
    assert_eq!(cache.read_versioned().1, generation);
}

#[test]
fn observer_never_sees_mixed_disable() {
    let mut h = Harness::homed(6);
    let cache = h.controller.status_cache();
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let done = done.clone();
        thread::spawn(move || {
            let mut reads = 0u64;
            loop {
                let finished = done.load(Ordering::Acquire);
                let snapshot = cache.read();
                let disabled = snapshot
                    .modules()
                    .iter()
                    .filter(|m| m.state == ModuleState::Disabled)
                    .count();
                assert!(disabled == 0 || disabled == 6, "torn snapshot: {disabled}/6");
                reads += 1;
                if finished {
                    return reads;
                }
            }
        })
    };

    h.power.set_current_override(Some(10_000.0));
    h.run_until(200, |c| c.disabled_reason().is_some());
    h.run(50);
    done.store(true, Ordering::Release);

    assert!(reader.join().unwrap() > 0);
    let final_view = h.controller.status_cache().read();
    assert!(final_view.modules().iter().all(|m| m.state == ModuleState::Disabled));
}
