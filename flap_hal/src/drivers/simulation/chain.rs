//! Simulated shift-register chain.
//!
//! Models what the control loop can observe through the bus:
//! - one stepper rotor per module, advanced by coil-pattern transitions
//! - a home sensor per rotor that reads active over a short arc
//! - loopback wires from output to input bits, with fault injection
//!
//! Inputs returned by a transfer are those latched before the new outputs
//! are clocked in, so an output change is visible one transfer later.

use flap_common::layout::{BusLayout, BusMap, COIL_PATTERNS};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::power::{SimulatedPower, Telemetry};
use crate::driver::{BusDriver, HalError};

/// Injectable home-sensor behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorFault {
    /// Sensor follows the rotor.
    #[default]
    None,
    /// Sensor always reads active (shorted).
    StuckActive,
    /// Sensor never reads active (disconnected).
    StuckInactive,
}

#[derive(Debug, Clone)]
struct Rotor {
    /// Absolute step position modulo one revolution.
    position: u32,
    /// Last coil pattern index seen, for step direction decoding.
    phase: u8,
    /// Rotor position at which the home arc begins.
    home_offset: u32,
    sensor: SensorFault,
    steps_taken: u64,
}

/// Software shift-register chain implementing [`BusDriver`].
pub struct SimulatedChain {
    map: BusMap,
    steps_per_revolution: u32,
    home_width: u32,
    rotors: Vec<Rotor>,
    /// Loopback channel driven → input channel it actually reaches.
    wiring: Vec<Option<usize>>,
    /// Loopback input channels shorted high.
    shorted: Vec<bool>,
    latched: Vec<u8>,
    outputs_enabled: bool,
    transfers: u64,
    realtime: bool,
    telemetry: Arc<Mutex<Telemetry>>,
}

impl SimulatedChain {
    /// Build a chain for `num_modules` modules wired per `layout`.
    ///
    /// Home arcs are spread deterministically around the drum so modules
    /// start at different distances from home.
    pub fn new(layout: BusLayout, num_modules: usize, steps_per_revolution: u32) -> Self {
        let map = BusMap::new(layout, num_modules);
        let loopbacks = map.loopbacks().len();
        let rotors = (0..num_modules)
            .map(|i| Rotor {
                position: 0,
                phase: 0,
                home_offset: ((i as u32 * 397 + 101) % steps_per_revolution),
                sensor: SensorFault::None,
                steps_taken: 0,
            })
            .collect();
        let latched = map.buffers().motor;

        info!(
            "Simulated {:?} chain: {} modules, {} loopbacks, {} steps/rev",
            layout, num_modules, loopbacks, steps_per_revolution
        );

        Self {
            map,
            steps_per_revolution,
            home_width: (steps_per_revolution / 64).max(1),
            rotors,
            wiring: (0..loopbacks).map(Some).collect(),
            shorted: vec![false; loopbacks],
            latched,
            outputs_enabled: false,
            transfers: 0,
            realtime: false,
            telemetry: Arc::new(Mutex::new(Telemetry::default())),
        }
    }

    /// Make `pause()` sleep for real instead of returning immediately.
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Power sensor reading this chain's coil activity.
    pub fn power_sensor(&self) -> SimulatedPower {
        SimulatedPower::attach(self.telemetry.clone())
    }

    /// Route loopback output `driven` to input channel `reaches` instead of its own.
    pub fn miswire_loopback(&mut self, driven: usize, reaches: usize) {
        self.wiring[driven] = Some(reaches);
    }

    /// Cut the wire of loopback channel `channel`.
    pub fn break_loopback(&mut self, channel: usize) {
        self.wiring[channel] = None;
    }

    /// Short loopback input `channel` high.
    pub fn short_loopback(&mut self, channel: usize) {
        self.shorted[channel] = true;
    }

    /// Inject a home-sensor fault on `module`.
    pub fn set_sensor_fault(&mut self, module: usize, fault: SensorFault) {
        self.rotors[module].sensor = fault;
    }

    /// Move the home arc of `module` by `delta` steps (magnet slipped).
    pub fn shift_home(&mut self, module: usize, delta: u32) {
        let r = &mut self.rotors[module];
        r.home_offset = (r.home_offset + delta) % self.steps_per_revolution;
    }

    /// Rotor position of `module`, in steps.
    pub fn rotor_position(&self, module: usize) -> u32 {
        self.rotors[module].position
    }

    /// Rotor position of `module` measured from its home edge.
    pub fn position_from_home(&self, module: usize) -> u32 {
        let r = &self.rotors[module];
        (r.position + self.steps_per_revolution - r.home_offset) % self.steps_per_revolution
    }

    /// Total steps `module` has moved.
    pub fn steps_taken(&self, module: usize) -> u64 {
        self.rotors[module].steps_taken
    }

    /// Number of `transfer()` calls so far.
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Output image latched by the last transfer.
    pub fn latched_outputs(&self) -> &[u8] {
        &self.latched
    }

    /// Whether `module`'s LED is lit in the latched outputs.
    pub fn led_on(&self, module: usize) -> bool {
        self.map
            .module(module)
            .led
            .is_some_and(|led| led.read(&self.latched))
    }

    /// Whether `module`'s coils are energised in the latched outputs.
    pub fn coils_energized(&self, module: usize) -> bool {
        self.map.module(module).motor.read(&self.latched) != 0
    }

    fn home_active(&self, index: usize) -> bool {
        let r = &self.rotors[index];
        match r.sensor {
            SensorFault::StuckActive => true,
            SensorFault::StuckInactive => false,
            SensorFault::None => {
                let rel = (r.position + self.steps_per_revolution - r.home_offset)
                    % self.steps_per_revolution;
                rel < self.home_width
            }
        }
    }

    fn sample_inputs(&self, inbound: &mut [u8]) {
        inbound.fill(0);
        for i in 0..self.rotors.len() {
            let home = self.map.module(i).home;
            home.write(inbound, self.home_active(i));
        }
        let loopbacks = self.map.loopbacks();
        for (k, lb) in loopbacks.iter().enumerate() {
            if lb.out.read(&self.latched) {
                if let Some(j) = self.wiring[k] {
                    loopbacks[j].input.write(inbound, true);
                }
            }
            if self.shorted[k] {
                lb.input.write(inbound, true);
            }
        }
    }

    fn drive_rotors(&mut self) {
        let mut energized = 0;
        for i in 0..self.rotors.len() {
            let nibble = self.map.module(i).motor.read(&self.latched);
            if nibble == 0 || !self.outputs_enabled {
                continue;
            }
            energized += 1;
            let Some(idx) = COIL_PATTERNS.iter().position(|&p| p == nibble) else {
                continue;
            };
            let rotor = &mut self.rotors[i];
            let idx = idx as u8;
            match (idx + 4 - rotor.phase) % 4 {
                1 => {
                    rotor.position = (rotor.position + 1) % self.steps_per_revolution;
                    rotor.steps_taken += 1;
                }
                3 => {
                    rotor.position =
                        (rotor.position + self.steps_per_revolution - 1) % self.steps_per_revolution;
                    rotor.steps_taken += 1;
                }
                _ => {}
            }
            rotor.phase = idx;
        }
        self.telemetry.lock().energized = energized;
    }
}

impl BusDriver for SimulatedChain {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn transfer(&mut self, outbound: &[u8], inbound: &mut [u8]) -> Result<(), HalError> {
        if outbound.len() != self.latched.len() {
            return Err(HalError::CommunicationError(format!(
                "outbound image is {} bytes, chain has {}",
                outbound.len(),
                self.latched.len()
            )));
        }
        let expected_in = self.map.buffers().sensor.len();
        if inbound.len() != expected_in {
            return Err(HalError::CommunicationError(format!(
                "inbound image is {} bytes, chain has {}",
                inbound.len(),
                expected_in
            )));
        }

        self.sample_inputs(inbound);
        self.latched.copy_from_slice(outbound);
        self.drive_rotors();
        self.transfers += 1;
        Ok(())
    }

    fn enable_outputs(&mut self) -> Result<(), HalError> {
        debug!("Simulated output enable asserted");
        self.outputs_enabled = true;
        Ok(())
    }

    fn pause(&mut self, duration: Duration) {
        if self.realtime {
            std::thread::sleep(duration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_module(chain: &mut SimulatedChain, module: usize, steps: usize) {
        let map = BusMap::new(BusLayout::Chainlink, 6);
        let mut bufs = map.buffers();
        let mut phase = 0usize;
        for _ in 0..steps {
            phase = (phase + 1) % 4;
            map.module(module).motor.write(&mut bufs.motor, COIL_PATTERNS[phase]);
            chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
        }
    }

    #[test]
    fn coil_sequence_advances_rotor() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        chain.enable_outputs().unwrap();
        step_module(&mut chain, 2, 10);
        assert_eq!(chain.rotor_position(2), 10);
        assert_eq!(chain.rotor_position(1), 0);
        assert!(chain.coils_energized(2));
    }

    #[test]
    fn rotors_hold_until_outputs_enabled() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        step_module(&mut chain, 0, 5);
        assert_eq!(chain.rotor_position(0), 0);
    }

    #[test]
    fn loopback_visible_after_second_transfer() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        let map = BusMap::new(BusLayout::Chainlink, 6);
        let mut bufs = map.buffers();
        let lb = map.loopbacks()[1];
        lb.out.write(&mut bufs.motor, true);

        chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
        assert!(!lb.input.read(&bufs.sensor));
        chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
        assert!(lb.input.read(&bufs.sensor));
        assert!(!map.loopbacks()[0].input.read(&bufs.sensor));
    }

    #[test]
    fn miswired_loopback_reaches_other_input() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        chain.miswire_loopback(0, 1);
        let map = BusMap::new(BusLayout::Chainlink, 6);
        let mut bufs = map.buffers();
        map.loopbacks()[0].out.write(&mut bufs.motor, true);
        chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
        chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
        assert!(!map.loopbacks()[0].input.read(&bufs.sensor));
        assert!(map.loopbacks()[1].input.read(&bufs.sensor));
    }

    #[test]
    fn home_sensor_follows_rotor() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        chain.enable_outputs().unwrap();
        let map = BusMap::new(BusLayout::Chainlink, 6);
        let mut bufs = map.buffers();
        let to_home = (200 - chain.position_from_home(0)) % 200;
        step_module(&mut chain, 0, to_home as usize);
        assert_eq!(chain.position_from_home(0), 0);
        chain.transfer(&bufs.motor.clone(), &mut bufs.sensor).unwrap();
        assert!(map.module(0).home.read(&bufs.sensor));
    }

    #[test]
    fn wrong_buffer_size_is_rejected() {
        let mut chain = SimulatedChain::new(BusLayout::Chainlink, 6, 200);
        let mut inbound = [0u8; 1];
        assert!(chain.transfer(&[0u8; 3], &mut inbound).is_err());
    }

    proptest::proptest! {
        #[test]
        fn rotor_tracks_net_steps(moves in proptest::collection::vec(proptest::bool::ANY, 0..400)) {
            let mut chain = SimulatedChain::new(BusLayout::Classic, 3, 200);
            chain.enable_outputs().unwrap();
            let map = BusMap::new(BusLayout::Classic, 3);
            let mut bufs = map.buffers();
            let mut phase = 0usize;
            let mut net = 0i64;
            for forward in moves {
                phase = if forward { (phase + 1) % 4 } else { (phase + 3) % 4 };
                net += if forward { 1 } else { -1 };
                map.module(1).motor.write(&mut bufs.motor, COIL_PATTERNS[phase]);
                chain.transfer(&bufs.motor, &mut bufs.sensor).unwrap();
            }
            proptest::prop_assert_eq!(chain.rotor_position(1) as i64, net.rem_euclid(200));
            proptest::prop_assert_eq!(chain.rotor_position(0), 0);
        }
    }
}
