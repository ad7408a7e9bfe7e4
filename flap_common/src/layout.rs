//! Shift-register bit layouts.
//!
//! Each module owns a 4-bit coil nibble in the outbound (motor) buffer and a
//! home-sensor bit in the inbound (sensor) buffer. Chainlink boards also
//! carry one status LED per module and two loopback channels per group of six
//! modules. The byte/mask of every signal is a pure function of the module
//! (or loopback) index; [`BusMap`] evaluates it once at startup so the control
//! loop only performs table lookups.
//!
//! ## Chainlink group (6 modules, 4 output bytes, 1 input byte)
//!
//! Output bytes are addressed from the end of the buffer (`base = len-1-4g`):
//!
//! | byte     | bits 7..4                 | bits 3..0                 |
//! |----------|---------------------------|---------------------------|
//! | base     | coils p=1                 | coils p=0                 |
//! | base - 1 | loopback 2g, LED p=2..0   | coils p=2                 |
//! | base - 2 | coils p=3                 | loopback 2g+1, LED p=5..3 |
//! | base - 3 | coils p=5                 | coils p=4                 |
//!
//! Input byte `g`: bits 0..5 home sensors p=0..5, bit 6 loopback 2g,
//! bit 7 loopback 2g+1.
//!
//! ## Classic
//!
//! Two modules per output byte (even index low nibble), four modules per
//! input byte (2 bits each, home sensor on the lower bit). No LEDs and no
//! loopbacks.

use serde::{Deserialize, Serialize};

/// Coil energisation sequence for one forward step per entry.
///
/// A rotor advances one step each time its nibble moves to the next entry;
/// a nibble of 0 releases the coils.
pub const COIL_PATTERNS: [u8; 4] = [0b1100, 0b0110, 0b0011, 0b1001];

/// Wiring topology, chosen once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusLayout {
    /// Chained 6-module driver boards with LEDs and loopback self-test.
    #[default]
    Chainlink,
    /// Plain 595/165 chain without LEDs or loopbacks.
    Classic,
}

/// A single bit in one of the bus buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitAddr {
    /// Byte offset in the buffer.
    pub byte: usize,
    /// Single-bit mask within the byte.
    pub mask: u8,
}

impl BitAddr {
    /// Set or clear the bit.
    #[inline]
    pub fn write(self, buf: &mut [u8], on: bool) {
        if on {
            buf[self.byte] |= self.mask;
        } else {
            buf[self.byte] &= !self.mask;
        }
    }

    /// Whether the bit is set.
    #[inline]
    pub fn read(self, buf: &[u8]) -> bool {
        buf[self.byte] & self.mask != 0
    }
}

/// A 4-bit coil field in the motor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nibble {
    /// Byte offset in the buffer.
    pub byte: usize,
    /// Upper (bits 7..4) or lower (bits 3..0) half.
    pub high: bool,
}

impl Nibble {
    #[inline]
    const fn shift(self) -> u8 {
        if self.high { 4 } else { 0 }
    }

    /// Mask covering the nibble within its byte.
    #[inline]
    pub const fn mask(self) -> u8 {
        0x0F << self.shift()
    }

    /// Replace the nibble with the low 4 bits of `bits`.
    #[inline]
    pub fn write(self, buf: &mut [u8], bits: u8) {
        let b = &mut buf[self.byte];
        *b = (*b & !self.mask()) | ((bits & 0x0F) << self.shift());
    }

    /// Current nibble value.
    #[inline]
    pub fn read(self, buf: &[u8]) -> u8 {
        (buf[self.byte] & self.mask()) >> self.shift()
    }
}

/// Bus signals owned by one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleBits {
    /// Coil outputs.
    pub motor: Nibble,
    /// Status LED output, if the layout has one.
    pub led: Option<BitAddr>,
    /// Home sensor input.
    pub home: BitAddr,
}

/// One loopback channel: the driven output and the input it is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopbackBits {
    /// Output bit driven during self-test.
    pub out: BitAddr,
    /// Input bit that must follow it.
    pub input: BitAddr,
}

impl BusLayout {
    /// Modules per board group, when the layout requires whole groups.
    pub const fn group_size(self) -> Option<usize> {
        match self {
            Self::Chainlink => Some(6),
            Self::Classic => None,
        }
    }

    /// Whether modules carry a status LED.
    pub const fn has_leds(self) -> bool {
        matches!(self, Self::Chainlink)
    }

    /// Outbound (motor/LED/loopback) buffer length.
    pub const fn motor_buffer_len(self, num_modules: usize) -> usize {
        match self {
            Self::Chainlink => num_modules / 6 * 4,
            Self::Classic => num_modules.div_ceil(2),
        }
    }

    /// Inbound (sensor/loopback) buffer length.
    pub const fn sensor_buffer_len(self, num_modules: usize) -> usize {
        match self {
            Self::Chainlink => num_modules / 6,
            Self::Classic => num_modules.div_ceil(4),
        }
    }

    /// Number of loopback self-test channels.
    pub const fn loopback_count(self, num_modules: usize) -> usize {
        match self {
            Self::Chainlink => num_modules / 6 * 2,
            Self::Classic => 0,
        }
    }

    fn module_bits(self, num_modules: usize, index: usize) -> ModuleBits {
        let len = self.motor_buffer_len(num_modules);
        match self {
            Self::Chainlink => {
                let group = index / 6;
                let pos = index % 6;
                let base = len - 1 - group * 4;
                let motor = match pos {
                    0 => Nibble { byte: base, high: false },
                    1 => Nibble { byte: base, high: true },
                    2 => Nibble { byte: base - 1, high: false },
                    3 => Nibble { byte: base - 2, high: true },
                    4 => Nibble { byte: base - 3, high: false },
                    _ => Nibble { byte: base - 3, high: true },
                };
                let led = if pos < 3 {
                    BitAddr { byte: base - 1, mask: 1 << (4 + pos) }
                } else {
                    BitAddr { byte: base - 2, mask: 1 << (pos - 3) }
                };
                ModuleBits {
                    motor,
                    led: Some(led),
                    home: BitAddr { byte: group, mask: 1 << pos },
                }
            }
            Self::Classic => ModuleBits {
                motor: Nibble {
                    byte: len - 1 - index / 2,
                    high: index % 2 == 1,
                },
                led: None,
                home: BitAddr {
                    byte: index / 4,
                    mask: 1 << ((index % 4) * 2),
                },
            },
        }
    }

    fn loopback_bits(self, num_modules: usize, channel: usize) -> LoopbackBits {
        let len = self.motor_buffer_len(num_modules);
        let even = channel % 2 == 0;
        LoopbackBits {
            out: BitAddr {
                byte: len - 1 - (channel / 2) * 4 - if even { 1 } else { 2 },
                mask: if even { 1 << 7 } else { 1 << 3 },
            },
            input: BitAddr {
                byte: channel / 2,
                mask: if even { 1 << 6 } else { 1 << 7 },
            },
        }
    }
}

/// Precomputed address table for one bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMap {
    layout: BusLayout,
    modules: Vec<ModuleBits>,
    loopbacks: Vec<LoopbackBits>,
    motor_len: usize,
    sensor_len: usize,
}

impl BusMap {
    /// Evaluate the layout for `num_modules` modules.
    pub fn new(layout: BusLayout, num_modules: usize) -> Self {
        Self {
            layout,
            modules: (0..num_modules)
                .map(|i| layout.module_bits(num_modules, i))
                .collect(),
            loopbacks: (0..layout.loopback_count(num_modules))
                .map(|k| layout.loopback_bits(num_modules, k))
                .collect(),
            motor_len: layout.motor_buffer_len(num_modules),
            sensor_len: layout.sensor_buffer_len(num_modules),
        }
    }

    /// Layout this map was built from.
    #[inline]
    pub fn layout(&self) -> BusLayout {
        self.layout
    }

    /// Signals of module `index`.
    #[inline]
    pub fn module(&self, index: usize) -> ModuleBits {
        self.modules[index]
    }

    /// Number of modules.
    #[inline]
    pub fn num_modules(&self) -> usize {
        self.modules.len()
    }

    /// Loopback channel table.
    #[inline]
    pub fn loopbacks(&self) -> &[LoopbackBits] {
        &self.loopbacks
    }

    /// Allocate zeroed buffers of the right size.
    pub fn buffers(&self) -> BusBuffers {
        BusBuffers {
            motor: vec![0; self.motor_len],
            sensor: vec![0; self.sensor_len],
        }
    }
}

/// Outbound and inbound shift-register images.
///
/// Sized once from the [`BusMap`]; never resized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusBuffers {
    /// Coils, LEDs and loopback outputs.
    pub motor: Vec<u8>,
    /// Home sensors and loopback inputs.
    pub sensor: Vec<u8>,
}

impl BusBuffers {
    /// De-energise every output.
    pub fn clear_outputs(&mut self) {
        self.motor.fill(0);
    }
}
