//! Serial port implementations.
//!
//! - [`StdioSerial`] - host link over the process's stdin/stdout
//! - [`MemorySerial`] - in-memory loopback for tests and tooling

use flap_common::MAX_MODULES;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::thread;
use tracing::{debug, warn};

use crate::driver::{HalError, SerialPort};

/// Bytes the stdin reader may queue ahead of the control loop.
///
/// Input is only drained while every module is idle; anything beyond this
/// is dropped.
pub const RX_QUEUE_BYTES: usize = 4 * (MAX_MODULES + 2);

/// Host link over stdin/stdout.
///
/// A reader thread blocks on stdin and forwards bytes through a bounded
/// channel so `read_byte` never blocks the control loop.
pub struct StdioSerial {
    rx: Receiver<u8>,
    closed: bool,
}

impl StdioSerial {
    /// Start the stdin reader thread.
    pub fn spawn() -> Result<Self, HalError> {
        let (tx, rx) = mpsc::sync_channel(RX_QUEUE_BYTES);
        thread::Builder::new()
            .name("serial-rx".to_string())
            .spawn(move || {
                let dropped = forward_input(std::io::stdin().lock(), &tx);
                debug!(dropped, "stdin closed");
            })
            .map_err(|e| HalError::InitFailed(format!("serial reader thread: {e}")))?;
        Ok(Self { rx, closed: false })
    }
}

/// Copy `reader` into `tx` until EOF or the receiver goes away. Bytes that
/// find the queue full are discarded; returns how many.
fn forward_input(mut reader: impl Read, tx: &SyncSender<u8>) -> u64 {
    let mut buf = [0u8; 64];
    let mut dropped = 0u64;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => return dropped,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("stdin read failed: {e}");
                return dropped;
            }
        };
        for &b in &buf[..n] {
            match tx.try_send(b) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    if dropped.is_power_of_two() {
                        warn!(dropped, "host input queue full, discarding");
                    }
                }
                Err(TrySendError::Disconnected(_)) => return dropped,
            }
        }
    }
}

impl SerialPort for StdioSerial {
    fn read_byte(&mut self) -> Option<u8> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(b) => Some(b),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    fn write_line(&mut self, line: &str) -> Result<(), HalError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        out.write_all(line.as_bytes())
            .and_then(|_| out.write_all(b"\n"))
            .and_then(|_| out.flush())
            .map_err(|e| HalError::SerialError(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct MemoryLink {
    input: VecDeque<u8>,
    output: Vec<String>,
}

/// In-memory serial port.
///
/// Cloning yields another handle onto the same link, so a test can keep one
/// handle while the controller owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySerial {
    link: Arc<Mutex<MemoryLink>>,
}

impl MemorySerial {
    /// Create an empty link.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if sent by the host.
    pub fn push_input(&self, text: &str) {
        self.link.lock().input.extend(text.bytes());
    }

    /// Bytes queued but not yet read by the controller.
    pub fn pending_input(&self) -> usize {
        self.link.lock().input.len()
    }

    /// Drain every line written so far.
    pub fn take_output(&self) -> Vec<String> {
        std::mem::take(&mut self.link.lock().output)
    }
}

impl SerialPort for MemorySerial {
    fn read_byte(&mut self) -> Option<u8> {
        self.link.lock().input.pop_front()
    }

    fn write_line(&mut self, line: &str) -> Result<(), HalError> {
        self.link.lock().output.push(line.to_string());
        Ok(())
    }
}
