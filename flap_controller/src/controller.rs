//! The control loop body: boot sequence and one tick.
//!
//! ## Boot
//! 1. Emit `init`, clock a cleared image onto the bus, enable outputs.
//! 2. Loopback self-test. Any fault → report each one and hold forever
//!    (watchdog fed, status published, no homing).
//! 3. LED acknowledgement, then `go_home()` on every module.
//!
//! ## Tick
//! 1. Sensor-test mode: release every coil, read the home sensors and
//!    clock each one straight back out on its module's LED. Otherwise:
//!    advance every module, compute LED flashes, transfer.
//! 2. Safety evaluation; a violation disables every module.
//! 3. When all modules are idle: flush pending acknowledgements once all are
//!    also stopped, then interpret buffered serial input.
//! 4. Publish the status snapshot.
//! 5. Feed the watchdog.
//!
//! The tick never fails. Bus and serial errors are logged and the tick
//! completes with the previous input image.

use flap_common::MAX_MODULES;
use flap_common::alphabet::Alphabet;
use flap_common::config::{ConfigError, FlapConfig};
use flap_common::layout::{BusBuffers, BusMap};
use flap_common::protocol::{DisableReason, ModuleReport, Response};
use flap_common::state::{ModuleState, StatusSnapshot};
use flap_hal::{BusDriver, PowerSense, SerialPort, Watchdog};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::command::{Command, CommandInterpreter};
use crate::error::ControllerError;
use crate::safety::{Activity, SafetyMonitor};
use crate::selftest;
use crate::state::{Module, MotionProfile};
use crate::status::{StatusCache, StatusPublisher};

/// Upper bound on serial bytes consumed in one tick.
pub const MAX_BYTES_PER_TICK: usize = 256;

// A full-width "=…\n" frame must fit in one tick.
static_assertions::const_assert!(MAX_BYTES_PER_TICK >= MAX_MODULES + 2);

/// Period of one LED flash step [ms].
const FLASH_STEP_MS: u64 = 200;

/// Hardware collaborators owned by the controller.
pub struct Peripherals<B, P, S, W> {
    /// Shift-register chain.
    pub bus: B,
    /// Current/voltage telemetry.
    pub power: P,
    /// Host link.
    pub serial: S,
    /// Liveness check.
    pub watchdog: W,
}

/// Controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Constructed; `boot()` not yet completed.
    Booting,
    /// Normal operation.
    Running,
    /// Self-test failed; only the watchdog and status cache are serviced.
    DiagnosticHold,
}

/// Whether a module's LED is lit at `now_ms`.
///
/// The LED blinks [`ModuleState::flash_count`] times, then stays dark for
/// the rest of a 3.2 s cycle.
#[inline]
pub fn led_flash_on(now_ms: u64, state: ModuleState) -> bool {
    let step = now_ms / FLASH_STEP_MS;
    let group = (step % 16) / 2;
    group < u64::from(state.flash_count()) && step % 2 == 0
}

/// Split-flap controller core.
pub struct Controller<B, P, S, W>
where
    B: BusDriver,
    P: PowerSense,
    S: SerialPort,
    W: Watchdog,
{
    alphabet: Alphabet,
    force_full_rotation: bool,
    profile: MotionProfile,
    map: BusMap,
    bufs: BusBuffers,
    modules: Vec<Module>,
    io: Peripherals<B, P, S, W>,
    safety: SafetyMonitor,
    interpreter: CommandInterpreter,
    pending_no_op: bool,
    pending_move_response: bool,
    publisher: StatusPublisher,
    snapshot: StatusSnapshot,
    mode: Mode,
    bus_errors: u64,
}

impl<B, P, S, W> Controller<B, P, S, W>
where
    B: BusDriver,
    P: PowerSense,
    S: SerialPort,
    W: Watchdog,
{
    /// Build a controller. Every buffer is sized here and never resized.
    ///
    /// # Errors
    /// `ControllerError::Config` if the configuration is invalid or `cache`
    /// describes a different number of modules.
    pub fn new(
        config: &FlapConfig,
        io: Peripherals<B, P, S, W>,
        cache: Arc<StatusCache>,
    ) -> Result<Self, ControllerError> {
        config.validate()?;
        let n = config.display.num_modules;
        if cache.read().len() != n {
            return Err(ConfigError::ValidationError(format!(
                "status cache sized for {} modules, display has {n}",
                cache.read().len()
            ))
            .into());
        }

        let map = BusMap::new(config.display.layout, n);
        let bufs = map.buffers();
        debug!(
            motor_bytes = bufs.motor.len(),
            sensor_bytes = bufs.sensor.len(),
            loopbacks = map.loopbacks().len(),
            "bus image allocated"
        );

        Ok(Self {
            alphabet: config.display.alphabet.clone(),
            force_full_rotation: config.display.force_full_rotation,
            profile: MotionProfile::new(&config.motion, config.display.alphabet.len()),
            map,
            bufs,
            modules: (0..n).map(Module::new).collect(),
            io,
            safety: SafetyMonitor::new(&config.safety, n),
            interpreter: CommandInterpreter::new(n),
            pending_no_op: false,
            pending_move_response: false,
            publisher: StatusPublisher::new(cache),
            snapshot: StatusSnapshot::new(n),
            mode: Mode::Booting,
            bus_errors: 0,
        })
    }

    // ─── Boot ───────────────────────────────────────────────────────

    /// Run the boot sequence.
    ///
    /// # Errors
    /// `ControllerError::SelfTestFailed` when the loopback test finds a
    /// wiring fault; the controller is then in [`Mode::DiagnosticHold`] and
    /// `tick()` keeps servicing the watchdog. `ControllerError::Hal` if the
    /// bus fails during boot.
    pub fn boot(&mut self) -> Result<(), ControllerError> {
        if self.mode != Mode::Booting {
            return Ok(());
        }
        self.emit(&Response::Init {
            num_modules: self.modules.len(),
        });
        info!(
            modules = self.modules.len(),
            layout = ?self.map.layout(),
            driver = self.io.bus.name(),
            "Booting display"
        );

        self.bufs.clear_outputs();
        self.io.bus.transfer(&self.bufs.motor, &mut self.bufs.sensor)?;
        self.io.bus.enable_outputs()?;

        let faults = selftest::run_loopback_test(&mut self.io.bus, &self.map, &mut self.bufs)?;
        self.io.watchdog.feed();
        if !faults.is_empty() {
            for fault in &faults {
                error!(driven = ?fault.driven, channel = fault.channel, "loopback fault");
                self.emit(&Response::LoopbackError {
                    driven: fault.driven.map(|k| k as u8),
                    channel: fault.channel as u8,
                });
            }
            self.mode = Mode::DiagnosticHold;
            self.publish();
            return Err(ControllerError::SelfTestFailed {
                faults: faults.len(),
            });
        }
        info!(channels = self.map.loopbacks().len(), "Loopback self-test passed");

        selftest::acknowledge(
            &mut self.io.bus,
            &self.map,
            &mut self.bufs,
            &mut self.io.watchdog,
        )?;

        for m in &mut self.modules {
            m.go_home();
        }
        self.mode = Mode::Running;
        self.publish();
        Ok(())
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// Run one control tick at `now_ms` (monotonic milliseconds).
    pub fn tick(&mut self, now_ms: u64) {
        if self.mode != Mode::Running {
            self.hold_tick();
            return;
        }

        if self.interpreter.sensor_test() {
            self.release_coils();
            self.transfer();
            self.mirror_sensors();
            self.transfer();
        } else {
            for (i, m) in self.modules.iter_mut().enumerate() {
                m.advance(&self.profile, self.map.module(i), &mut self.bufs);
            }
            self.update_leds(now_ms);
            self.transfer();
        }

        let activity = self.activity();
        if let Some(reason) = self.safety.evaluate(now_ms, activity, &mut self.io.power) {
            self.disable_all(reason);
        }

        let activity = self.activity();
        if activity.all_idle {
            if activity.all_stopped {
                if self.pending_no_op {
                    self.pending_no_op = false;
                    self.emit(&Response::NoOp);
                }
                if self.pending_move_response {
                    self.pending_move_response = false;
                    self.dump_status();
                }
            }
            self.poll_serial(activity.all_stopped);
        }

        self.publish();
        self.io.watchdog.feed();
    }

    /// Diagnostic hold: keep the host and the watchdog serviced, nothing else.
    fn hold_tick(&mut self) {
        self.publish();
        self.io.watchdog.feed();
    }

    // ─── Operations ─────────────────────────────────────────────────

    /// Force every module off and de-energise the bus.
    ///
    /// Idempotent: repeated calls re-drive the outputs but only the first
    /// since the last reset is reported to the host.
    pub fn disable_all(&mut self, reason: DisableReason) {
        for m in &mut self.modules {
            m.disable();
        }
        self.bufs.clear_outputs();
        self.transfer();
        if self.safety.latch(reason) {
            error!(%reason, "Disabling all modules");
            self.emit(&Response::Disabled { reason });
        }
    }

    /// Map each character to a flap and start the moves, then echo the
    /// received text. Characters outside the alphabet leave their module's
    /// target unchanged.
    pub fn show_string(&mut self, text: &[u8]) {
        for (m, &byte) in self.modules.iter_mut().zip(text) {
            if let Some(index) = self.alphabet.find(byte) {
                m.go_to(index, self.force_full_rotation, &self.profile);
            }
        }
        self.pending_move_response = true;
        self.emit(&Response::MoveEcho {
            dest: String::from_utf8_lossy(text).into_owned(),
        });
    }

    /// Clear fault counters, re-arm the safety latch and re-home everything.
    pub fn reset(&mut self) {
        for m in &mut self.modules {
            m.reset_fault_counters();
            m.go_home();
        }
        self.safety.rearm();
        info!("Fault counters cleared, re-homing all modules");
    }

    /// Send the full status record.
    pub fn dump_status(&mut self) {
        let modules = self
            .modules
            .iter()
            .map(|m| ModuleReport {
                state: m.state(),
                flap: self
                    .alphabet
                    .symbol(m.current_flap_index() as usize)
                    .unwrap_or(' '),
                count_missed_home: m.count_missed_home(),
                count_unexpected_home: m.count_unexpected_home(),
            })
            .collect();
        self.emit(&Response::Status { modules });
    }

    // ─── Accessors ──────────────────────────────────────────────────

    /// Lifecycle phase.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Module state machines, in bus order.
    #[inline]
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Shared motion parameters.
    #[inline]
    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    /// Bus driver.
    #[inline]
    pub fn bus(&self) -> &B {
        &self.io.bus
    }

    /// Bus driver, mutably (fault injection in tests).
    #[inline]
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.io.bus
    }

    /// Observer handle onto the status cache.
    pub fn status_cache(&self) -> Arc<StatusCache> {
        self.publisher.cache()
    }

    /// Whether sensor-test mode is on.
    #[inline]
    pub fn sensor_test(&self) -> bool {
        self.interpreter.sensor_test()
    }

    /// Latched disable reason, if any.
    #[inline]
    pub fn disabled_reason(&self) -> Option<DisableReason> {
        self.safety.latched()
    }

    /// Aggregate idle/stopped classification.
    pub fn activity(&self) -> Activity {
        Activity {
            all_idle: self.modules.iter().all(Module::is_idle),
            all_stopped: self.modules.iter().all(Module::is_stopped),
        }
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn poll_serial(&mut self, all_stopped: bool) {
        for _ in 0..MAX_BYTES_PER_TICK {
            let Some(byte) = self.io.serial.read_byte() else {
                break;
            };
            match self.interpreter.accept(byte, all_stopped) {
                Some(Command::SensorTest(enabled)) => {
                    info!(enabled, "Sensor test mode");
                    self.emit(&Response::SensorTest { enabled });
                }
                Some(Command::Reset) => self.reset(),
                Some(Command::NoOp) => self.pending_no_op = true,
                Some(Command::ShowString(text)) => self.show_string(&text),
                None => {}
            }
        }
    }

    /// Zero every coil nibble. A move that finished on the tick sensor-test
    /// mode started leaves its last phase in the image.
    fn release_coils(&mut self) {
        for i in 0..self.map.num_modules() {
            self.map.module(i).motor.write(&mut self.bufs.motor, 0);
        }
    }

    fn mirror_sensors(&mut self) {
        for i in 0..self.map.num_modules() {
            let bits = self.map.module(i);
            if let Some(led) = bits.led {
                led.write(&mut self.bufs.motor, bits.home.read(&self.bufs.sensor));
            }
        }
    }

    fn update_leds(&mut self, now_ms: u64) {
        if !self.map.layout().has_leds() {
            return;
        }
        for (i, m) in self.modules.iter().enumerate() {
            if let Some(led) = self.map.module(i).led {
                led.write(&mut self.bufs.motor, led_flash_on(now_ms, m.state()));
            }
        }
    }

    fn transfer(&mut self) {
        if let Err(e) = self.io.bus.transfer(&self.bufs.motor, &mut self.bufs.sensor) {
            self.bus_errors += 1;
            if self.bus_errors.is_power_of_two() {
                warn!(errors = self.bus_errors, "bus transfer failed: {e}");
            }
        }
    }

    fn publish(&mut self) {
        for (slot, m) in self.snapshot.modules_mut().iter_mut().zip(&self.modules) {
            *slot = m.status();
        }
        self.publisher.publish(&self.snapshot);
    }

    fn emit(&mut self, response: &Response) {
        match response.encode() {
            Ok(line) => {
                if let Err(e) = self.io.serial.write_line(&line) {
                    warn!("serial write failed: {e}");
                }
            }
            Err(e) => warn!("response encoding failed: {e}"),
        }
    }
}
