//! Serial command interpreter.
//!
//! Turns the inbound byte stream into [`Command`]s. The interpreter only
//! parses; the controller applies each command and emits the responses.
//!
//! | Byte   | Effect                                                       |
//! |--------|--------------------------------------------------------------|
//! | `%`    | toggle sensor-test mode, only while every module is stopped  |
//! | `@`    | reset fault counters and re-home every module                |
//! | `#`    | acknowledge with `no_op` once every module is stopped        |
//! | `=`    | clear the receive buffer                                     |
//! | `\n`   | show the receive buffer                                      |
//! | other  | append to the receive buffer while it has room               |
//!
//! While sensor-test mode is on, every byte except `%` is ignored.

use flap_common::MAX_MODULES;
use flap_common::protocol::bytes;
use tracing::debug;

/// Fixed-capacity receive buffer; one byte per module.
pub type ReceiveBuffer = heapless::Vec<u8, MAX_MODULES>;

/// A parsed host command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Sensor-test mode was switched to the contained value.
    SensorTest(bool),
    /// Reset fault counters and re-home.
    Reset,
    /// Deferred acknowledgement requested.
    NoOp,
    /// Show one character per module, in module order.
    ShowString(ReceiveBuffer),
}

/// Byte-at-a-time command parser.
#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    recv: ReceiveBuffer,
    capacity: usize,
    sensor_test: bool,
}

impl CommandInterpreter {
    /// Interpreter for a display of `num_modules` modules.
    pub fn new(num_modules: usize) -> Self {
        Self {
            recv: ReceiveBuffer::new(),
            capacity: num_modules.min(MAX_MODULES),
            sensor_test: false,
        }
    }

    /// Whether sensor-test mode is on.
    #[inline]
    pub fn sensor_test(&self) -> bool {
        self.sensor_test
    }

    /// Bytes accumulated since the last dispatch or clear.
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.recv
    }

    /// Feed one byte. `all_stopped` gates the sensor-test toggle.
    pub fn accept(&mut self, byte: u8, all_stopped: bool) -> Option<Command> {
        if byte == bytes::SENSOR_TEST {
            if !all_stopped {
                debug!("sensor test toggle ignored while moving");
                return None;
            }
            self.sensor_test = !self.sensor_test;
            return Some(Command::SensorTest(self.sensor_test));
        }
        if self.sensor_test {
            return None;
        }
        match byte {
            bytes::RESET => Some(Command::Reset),
            bytes::NO_OP => Some(Command::NoOp),
            bytes::CLEAR => {
                self.recv.clear();
                None
            }
            bytes::DISPATCH => Some(Command::ShowString(std::mem::take(&mut self.recv))),
            other => {
                if self.recv.len() < self.capacity {
                    // Capacity never exceeds MAX_MODULES, so the push cannot fail.
                    let _ = self.recv.push(other);
                }
                None
            }
        }
    }
}
