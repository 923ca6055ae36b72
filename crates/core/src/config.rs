//! Runtime configuration for the cartridge and debugger.
//!
//! The host application owns persistence; this struct only carries the
//! values and their defaults. It derives serde so any settings store can
//! round-trip it.

use serde::{Deserialize, Serialize};

/// Console video standard, forwarded to the coprocessor so it can scale
/// its notion of elapsed time.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleTiming {
    /// NTSC: 1.19 MHz CPU clock, 262 scanlines.
    #[default]
    Ntsc,
    /// PAL: 1.18 MHz CPU clock, 312 scanlines.
    Pal,
    /// SECAM: PAL timing with a reduced palette.
    Secam,
}

impl ConsoleTiming {
    /// Host CPU frequency in Hz.
    pub const fn cpu_hz(self) -> f64 {
        match self {
            Self::Ntsc => 1_193_191.666_666_67,
            Self::Pal | Self::Secam => 1_182_298.0,
        }
    }
}

/// Cartridge and debugger settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Fill device RAM with pseudo-random bytes on reset instead of zeros
    pub ram_random: bool,
    /// Bank selected on reset (the BUS driver always starts in bank 6)
    pub start_bank: u16,
    /// Number of rewind levels kept by the debugger
    pub rewind_capacity: usize,
    /// Video standard of the host console
    pub timing: ConsoleTiming,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            ram_random: false,
            start_bank: crate::START_BANK,
            rewind_capacity: crate::REWIND_CAPACITY,
            timing: ConsoleTiming::Ntsc,
        }
    }
}
