//! ARM coprocessor bridge.
//!
//! The Harmony board runs user ARM code when the 6507 writes to CALLFN.
//! The interpreter itself is an external collaborator behind
//! [`Coprocessor`]; this module defines its contract and the callback
//! surface the cartridge offers back to it.

use thiserror::Error;

use crate::config::ConsoleTiming;

/// CALLFN selector: run ARM code with IRQ-driven audio
pub const CALLFN_RUN_IRQ: u8 = 254;
/// CALLFN selector: run ARM code without IRQ-driven audio
pub const CALLFN_RUN: u8 = 255;

/// Run-time fault raised by the interpreter (bad opcode, bus error, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ARM fault: {message} (pc=0x{pc:08X})")]
pub struct CoprocessorFault {
    pub message: String,
    pub pc: u32,
}

impl CoprocessorFault {
    pub fn new(message: impl Into<String>, pc: u32) -> Self {
        CoprocessorFault { message: message.into(), pc }
    }
}

/// Functions the ARM driver can call back into the cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbCallback {
    /// _SetNote: set a channel's frequency
    SetNote,
    /// _ResetWave: zero a channel's counter so samples restart
    ResetWave,
    /// _GetWavePtr: read a channel's counter
    GetWavePtr,
    /// _SetWaveSize: set a channel's waveform-size shift
    SetWaveSize,
}

impl ThumbCallback {
    pub fn from_u8(function: u8) -> Option<Self> {
        match function {
            0 => Some(Self::SetNote),
            1 => Some(Self::ResetWave),
            2 => Some(Self::GetWavePtr),
            3 => Some(Self::SetWaveSize),
            _ => None,
        }
    }
}

/// Callback surface offered to the coprocessor while it runs.
///
/// Channel indices outside 0..3 are ignored.
pub trait CoprocessorHost {
    fn set_note(&mut self, channel: u32, frequency: u32);
    fn reset_wave(&mut self, channel: u32);
    fn wave_ptr(&self, channel: u32) -> u32;
    fn set_wave_size(&mut self, channel: u32, size: u32);

    /// Numeric dispatcher used by interpreters that trap on a fixed
    /// callback address and pass the function number in a register.
    fn thumb_callback(&mut self, function: u8, value1: u32, value2: u32) -> u32 {
        match ThumbCallback::from_u8(function) {
            Some(ThumbCallback::SetNote) => self.set_note(value1, value2),
            Some(ThumbCallback::ResetWave) => self.reset_wave(value1),
            Some(ThumbCallback::GetWavePtr) => return self.wave_ptr(value1),
            Some(ThumbCallback::SetWaveSize) => self.set_wave_size(value1, value2),
            None => {}
        }
        0
    }
}

/// External ARM interpreter.
pub trait Coprocessor {
    /// Execute ARM code for the 6507 cycles that elapsed since the previous
    /// call. `rom` is the full cartridge image and `ram` the device RAM.
    fn run(
        &mut self,
        cycles: i32,
        rom: &[u8],
        ram: &mut [u8],
        host: &mut dyn CoprocessorHost,
    ) -> Result<(), CoprocessorFault>;

    /// Console video standard changed.
    fn set_console_timing(&mut self, _timing: ConsoleTiming) {}
}
