//! Per-module state machine: homing, rotation and fault recovery.
//!
//! One [`Module`] per physical unit. Each control tick calls
//! [`Module::advance`], which reads the module's home sensor bit from the
//! inbound image, updates the state machine, and writes the module's coil
//! nibble into the outbound image. Nothing else touches the bus.
//!
//! ## Sensor latency
//!
//! The inbound image of a transfer is sampled before the outbound image of
//! the same transfer is latched, so the home bit read at tick `t` describes
//! the rotor as commanded two ticks earlier. The module keeps the last two
//! commanded positions and judges every reading against the one it
//! actually describes.
//!
//! ## Transitions
//!
//! | From          | Event                                   | To            |
//! |---------------|-----------------------------------------|---------------|
//! | any           | `go_home()`                             | `LookForHome` |
//! | `LookForHome` | home edge                               | `Normal`      |
//! | `LookForHome` | search exhausted, sensor seen inactive  | `SensorError` |
//! | `LookForHome` | search exhausted, sensor always active  | `Panic`       |
//! | `Normal`      | missed/unexpected home, within budget   | `LookForHome` |
//! | `Normal`      | missed/unexpected home, budget exceeded | `SensorError` |
//! | any           | `go_to()` outside the alphabet          | `Panic`       |
//! | any           | `disable()`                             | `Disabled`    |

use flap_common::layout::{BusBuffers, COIL_PATTERNS, ModuleBits};
use flap_common::state::{ModuleState, ModuleStatus};
use tracing::{debug, error, info, warn};

use super::profile::MotionProfile;

/// One physical split-flap unit.
#[derive(Debug, Clone)]
pub struct Module {
    index: u8,
    state: ModuleState,
    target: u8,
    current_flap: u8,
    /// Believed rotor step, relative to the home edge once homed.
    position: u32,
    /// Index into `COIL_PATTERNS` of the last pattern written.
    coil_phase: u8,
    /// 0 = at rest; otherwise the 1-based acceleration stage.
    accel_step: usize,
    countdown: u32,
    remaining: u32,
    count_missed_home: u32,
    count_unexpected_home: u32,
    consecutive_faults: u32,
    /// Positions commanded by the previous two advances (newest first).
    commanded: [u32; 2],
    last_home: Option<bool>,
    home_seen: bool,
    was_in_window: bool,
    search_steps: u32,
    search_always_active: bool,
}

impl Module {
    /// Module `index` with unknown position. Call [`Module::go_home`] before
    /// the first [`Module::advance`].
    pub fn new(index: usize) -> Self {
        Self {
            index: index as u8,
            state: ModuleState::LookForHome,
            target: 0,
            current_flap: 0,
            position: 0,
            coil_phase: 0,
            accel_step: 0,
            countdown: 0,
            remaining: 0,
            count_missed_home: 0,
            count_unexpected_home: 0,
            consecutive_faults: 0,
            commanded: [0; 2],
            last_home: None,
            home_seen: false,
            was_in_window: false,
            search_steps: 0,
            search_always_active: true,
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Current state.
    #[inline]
    pub const fn state(&self) -> ModuleState {
        self.state
    }

    /// Flap index the module is heading for.
    #[inline]
    pub const fn target_flap_index(&self) -> u8 {
        self.target
    }

    /// Flap index currently shown.
    #[inline]
    pub const fn current_flap_index(&self) -> u8 {
        self.current_flap
    }

    /// Acceleration stage; zero means mechanically at rest.
    #[inline]
    pub const fn current_accel_step(&self) -> usize {
        self.accel_step
    }

    /// Homes expected but not seen.
    #[inline]
    pub const fn count_missed_home(&self) -> u32 {
        self.count_missed_home
    }

    /// Home edges seen outside the expected window.
    #[inline]
    pub const fn count_unexpected_home(&self) -> u32 {
        self.count_unexpected_home
    }

    /// Observer-visible status.
    #[inline]
    pub const fn status(&self) -> ModuleStatus {
        ModuleStatus {
            flap_index: self.current_flap,
            state: self.state,
        }
    }

    /// Commands are accepted only while every module is idle.
    #[inline]
    pub const fn is_idle(&self) -> bool {
        match self.state {
            ModuleState::Normal => self.accel_step == 0,
            ModuleState::LookForHome
            | ModuleState::SensorError
            | ModuleState::Panic
            | ModuleState::Disabled => true,
        }
    }

    /// Mechanically at rest (or forced off).
    #[inline]
    pub const fn is_stopped(&self) -> bool {
        matches!(self.state, ModuleState::Panic | ModuleState::Disabled) || self.accel_step == 0
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Set a new target flap.
    ///
    /// A target equal to the current one is ignored unless
    /// `force_full_rotation` is set, in which case a module already showing
    /// it makes one full revolution. Targets set while homing or held are
    /// pursued after the next successful home.
    pub fn go_to(&mut self, index: usize, force_full_rotation: bool, profile: &MotionProfile) {
        if index >= profile.num_flaps as usize {
            error!(module = self.index, index, "target outside the alphabet");
            self.stop();
            self.set_state(ModuleState::Panic);
            return;
        }
        let index = index as u8;
        if index == self.target && !force_full_rotation {
            return;
        }
        self.target = index;
        if self.state == ModuleState::Normal {
            let mut distance = profile.distance(self.position, profile.flap_step(index));
            if distance == 0 && force_full_rotation {
                distance = profile.steps_per_revolution;
            }
            self.remaining = distance;
        }
    }

    /// Forget the position and search for home. Leaves any held state.
    pub fn go_home(&mut self) {
        self.consecutive_faults = 0;
        self.begin_search();
    }

    /// Clear both fault counters without touching the state.
    pub fn reset_fault_counters(&mut self) {
        self.count_missed_home = 0;
        self.count_unexpected_home = 0;
        self.consecutive_faults = 0;
    }

    /// Force the module off. Stays off until [`Module::go_home`].
    pub fn disable(&mut self) {
        self.stop();
        self.set_state(ModuleState::Disabled);
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Consume one tick: read the home bit, step the state machine, write
    /// the coil nibble.
    pub fn advance(&mut self, profile: &MotionProfile, bits: ModuleBits, bufs: &mut BusBuffers) {
        let home = bits.home.read(&bufs.sensor);
        let rising = self.last_home == Some(false) && home;
        self.last_home = Some(home);

        match self.state {
            ModuleState::Normal => self.track_home(profile, rising),
            ModuleState::LookForHome => self.search(profile, home, rising),
            ModuleState::SensorError | ModuleState::Panic | ModuleState::Disabled => {}
        }

        let nibble = match self.state {
            ModuleState::Normal => self.drive(profile, false),
            ModuleState::LookForHome => self.drive(profile, true),
            ModuleState::SensorError | ModuleState::Panic | ModuleState::Disabled => {
                self.stop();
                0
            }
        };
        bits.motor.write(&mut bufs.motor, nibble);
        self.commanded = [self.position, self.commanded[0]];
    }

    /// Position described by the home bit read this tick.
    #[inline]
    fn sensed(&self) -> u32 {
        self.commanded[1]
    }

    fn track_home(&mut self, profile: &MotionProfile, rising: bool) {
        if rising {
            let sensed = self.sensed();
            if profile.in_home_window(sensed) {
                self.resync(profile, profile.offset_from_home(sensed));
                self.consecutive_faults = 0;
                self.home_seen = true;
            } else {
                self.count_unexpected_home += 1;
                warn!(
                    module = self.index,
                    position = sensed,
                    count = self.count_unexpected_home,
                    "unexpected home"
                );
                self.home_fault(profile);
                return;
            }
        }

        let in_window = profile.in_home_window(self.sensed());
        if self.was_in_window && !in_window {
            if !self.home_seen {
                self.count_missed_home += 1;
                warn!(module = self.index, count = self.count_missed_home, "missed home");
                self.home_fault(profile);
                return;
            }
            self.home_seen = false;
        }
        self.was_in_window = in_window;
    }

    fn search(&mut self, profile: &MotionProfile, home: bool, rising: bool) {
        if !home {
            self.search_always_active = false;
        }
        if rising {
            let sensed = self.sensed();
            self.resync(profile, sensed as i64);
            self.home_seen = true;
            self.was_in_window = true;
            self.remaining = profile.distance(self.position, profile.flap_step(self.target));
            debug!(module = self.index, steps = self.search_steps, "home found");
            self.set_state(ModuleState::Normal);
            return;
        }
        if self.search_steps >= profile.search_limit_steps {
            self.stop();
            if self.search_always_active {
                error!(module = self.index, "home sensor stuck active");
                self.set_state(ModuleState::Panic);
            } else {
                self.count_missed_home += 1;
                self.set_state(ModuleState::SensorError);
            }
        }
    }

    /// Shift every believed position so the point sensed at `offset` becomes
    /// step 0, keeping the remaining distance pointed at the same flap.
    fn resync(&mut self, profile: &MotionProfile, offset: i64) {
        if offset == 0 {
            return;
        }
        let spr = profile.steps_per_revolution as i64;
        let shift = |p: u32| (p as i64 - offset).rem_euclid(spr) as u32;
        self.position = shift(self.position);
        self.commanded = [shift(self.commanded[0]), shift(self.commanded[1])];
        self.current_flap = profile.flap_at(self.position);
        if self.state == ModuleState::Normal {
            self.remaining = (self.remaining as i64 + offset).rem_euclid(spr) as u32;
        }
    }

    fn home_fault(&mut self, profile: &MotionProfile) {
        self.consecutive_faults += 1;
        if self.consecutive_faults > profile.retry_budget {
            self.stop();
            self.set_state(ModuleState::SensorError);
        } else {
            self.begin_search();
        }
    }

    fn begin_search(&mut self) {
        self.search_steps = 0;
        self.search_always_active = true;
        self.last_home = None;
        self.home_seen = false;
        self.was_in_window = false;
        self.set_state(ModuleState::LookForHome);
    }

    /// Ramp the motor and return the coil nibble for this tick.
    fn drive(&mut self, profile: &MotionProfile, searching: bool) -> u8 {
        if !searching && self.remaining == 0 {
            self.accel_step = 0;
            return 0;
        }
        if self.accel_step == 0 {
            self.accel_step = 1;
            self.countdown = profile.period(1);
        }
        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return COIL_PATTERNS[self.coil_phase as usize];
        }

        self.coil_phase = (self.coil_phase + 1) % 4;
        self.position = (self.position + 1) % profile.steps_per_revolution;
        self.current_flap = profile.flap_at(self.position);

        if searching {
            self.search_steps += 1;
            if self.accel_step < profile.max_stage() {
                self.accel_step += 1;
            }
        } else {
            self.remaining -= 1;
            if self.remaining == 0 {
                self.accel_step = 0;
                return COIL_PATTERNS[self.coil_phase as usize];
            }
            if (self.remaining as usize) < self.accel_step {
                self.accel_step = (self.accel_step - 1).max(1);
            } else if self.accel_step < profile.max_stage() {
                self.accel_step += 1;
            }
        }
        self.countdown = profile.period(self.accel_step);
        COIL_PATTERNS[self.coil_phase as usize]
    }

    fn stop(&mut self) {
        self.accel_step = 0;
        self.countdown = 0;
        self.remaining = 0;
    }

    fn set_state(&mut self, next: ModuleState) {
        if next == self.state {
            return;
        }
        let prev = self.state;
        self.state = next;
        match next {
            ModuleState::SensorError | ModuleState::Panic => warn!(
                module = self.index,
                from = %prev,
                to = %next,
                missed = self.count_missed_home,
                unexpected = self.count_unexpected_home,
                "module state changed"
            ),
            _ => info!(module = self.index, from = %prev, to = %next, "module state changed"),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
