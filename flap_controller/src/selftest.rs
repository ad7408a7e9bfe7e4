//! Boot-time loopback self-test and LED acknowledgement.
//!
//! Each loopback channel wires one output bit straight back to one input
//! bit. Driving a single channel must light exactly its own input; with
//! every output cleared, no loopback input may be set. Two transfers are
//! needed per check because inputs are latched before outputs.

use flap_common::layout::{BusBuffers, BusMap};
use flap_hal::{BusDriver, HalError, Watchdog};
use std::time::Duration;
use tracing::{debug, info};

/// Acknowledgement flash rounds after a passing self-test.
pub const ACK_ROUNDS: usize = 3;
/// LED on-time per module during the acknowledgement.
pub const ACK_LED_HOLD: Duration = Duration::from_millis(10);
/// Pause between acknowledgement rounds.
pub const ACK_ROUND_PAUSE: Duration = Duration::from_millis(500);

/// One loopback input that disagreed with the driven pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackFault {
    /// Channel being driven, or `None` for the all-off check.
    pub driven: Option<usize>,
    /// Channel whose input was wrong.
    pub channel: usize,
}

fn exchange<B: BusDriver + ?Sized>(bus: &mut B, bufs: &mut BusBuffers) -> Result<(), HalError> {
    bus.transfer(&bufs.motor, &mut bufs.sensor)
}

fn check_inputs(map: &BusMap, bufs: &BusBuffers, driven: Option<usize>, faults: &mut Vec<LoopbackFault>) {
    for (channel, lb) in map.loopbacks().iter().enumerate() {
        let expected = driven == Some(channel);
        if lb.input.read(&bufs.sensor) != expected {
            faults.push(LoopbackFault { driven, channel });
        }
    }
}

/// Drive every loopback channel in turn, then none, and report mismatches.
///
/// Leaves all outputs cleared. An empty result means the wiring is sound.
pub fn run_loopback_test<B: BusDriver + ?Sized>(
    bus: &mut B,
    map: &BusMap,
    bufs: &mut BusBuffers,
) -> Result<Vec<LoopbackFault>, HalError> {
    let mut faults = Vec::new();
    let loopbacks = map.loopbacks();

    for (k, lb) in loopbacks.iter().enumerate() {
        bufs.clear_outputs();
        lb.out.write(&mut bufs.motor, true);
        exchange(bus, bufs)?;
        exchange(bus, bufs)?;
        check_inputs(map, bufs, Some(k), &mut faults);
    }

    bufs.clear_outputs();
    exchange(bus, bufs)?;
    exchange(bus, bufs)?;
    check_inputs(map, bufs, None, &mut faults);

    debug!(channels = loopbacks.len(), faults = faults.len(), "loopback test finished");
    Ok(faults)
}

/// Flash each module's LED in turn, [`ACK_ROUNDS`] times.
///
/// Uses the bus's own pause, so it is instantaneous on a non-realtime
/// simulation. Does nothing on layouts without LEDs.
pub fn acknowledge<B, W>(
    bus: &mut B,
    map: &BusMap,
    bufs: &mut BusBuffers,
    watchdog: &mut W,
) -> Result<(), HalError>
where
    B: BusDriver + ?Sized,
    W: Watchdog + ?Sized,
{
    if !map.layout().has_leds() {
        return Ok(());
    }
    for _ in 0..ACK_ROUNDS {
        for i in 0..map.num_modules() {
            let Some(led) = map.module(i).led else { continue };
            led.write(&mut bufs.motor, true);
            exchange(bus, bufs)?;
            bus.pause(ACK_LED_HOLD);
            led.write(&mut bufs.motor, false);
            exchange(bus, bufs)?;
        }
        watchdog.feed();
        bus.pause(ACK_ROUND_PAUSE);
    }
    info!("Self-test acknowledged");
    Ok(())
}
