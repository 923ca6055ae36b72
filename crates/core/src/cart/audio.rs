//! Music-mode data fetchers.
//!
//! Three phase accumulators clocked by a 20 kHz oscillator on the Harmony
//! board. The 6507 polls the AMPLITUDE hotspot once per sample; each poll
//! converts the elapsed 6507 cycles to oscillator clocks (carrying the
//! fraction) and advances every counter by `frequency * clocks`.
//!
//! Output is either the sum of three waveform lookups (3-voice mode) or a
//! 4-bit packed sample (digital mode).

use super::ram::BusRam;
use super::thumb::CoprocessorHost;
use crate::config::ConsoleTiming;

/// Harmony music oscillator frequency in Hz
pub const BUS_OSC_HZ: f64 = 20_000.0;
/// 6507 clock used for the oscillator ratio. The driver assumes NTSC
/// whatever the console standard.
pub const HOST_CPU_HZ: f64 = ConsoleTiming::Ntsc.cpu_hz();
/// Reset value of each waveform-size shift (32-byte waveforms)
pub const DEFAULT_WAVEFORM_SIZE: u8 = 27;
/// Fixed-point scale used to serialize the fractional clock carry
pub const FRACTION_SCALE: f64 = 100_000_000.0;

/// Channel counters, frequencies and the oscillator phase.
#[derive(Debug, Clone, PartialEq)]
pub struct MusicState {
    pub counters: [u32; 3],
    pub frequencies: [u32; 3],
    pub waveform_size: [u8; 3],
    /// Fraction of an oscillator clock carried between updates
    pub fractional_clocks: f64,
    /// 6507 cycle count at the last update
    pub system_cycles: u32,
}

impl MusicState {
    pub fn new() -> Self {
        MusicState {
            counters: [0; 3],
            frequencies: [0; 3],
            waveform_size: [DEFAULT_WAVEFORM_SIZE; 3],
            fractional_clocks: 0.0,
            system_cycles: 0,
        }
    }

    /// Advance all counters to host cycle `now`.
    pub fn update(&mut self, now: u32) {
        let cycles = now.wrapping_sub(self.system_cycles) as i32;
        self.system_cycles = now;

        let clocks = (BUS_OSC_HZ * cycles as f64) / HOST_CPU_HZ + self.fractional_clocks;
        // Floor keeps the carry in [0, 1) even if time ran backwards
        let whole = clocks.floor();
        self.fractional_clocks = clocks - whole;
        let whole = whole as i32;

        if whole <= 0 {
            return;
        }
        for x in 0..3 {
            self.counters[x] = self.counters[x]
                .wrapping_add(self.frequencies[x].wrapping_mul(whole as u32));
        }
    }

    /// 4-bit sample from the packed table in the ROM image. Bit 20 of the
    /// first counter picks the nibble: clear = high, set = low.
    pub fn digital_sample(&self, image: &[u8], sample_base: u32) -> u8 {
        let index = sample_base.wrapping_add(self.counters[0] >> 21) as usize;
        let mut value = image.get(index).copied().unwrap_or(0);
        if self.counters[0] & (1 << 20) == 0 {
            value >>= 4;
        }
        value & 0x0F
    }

    /// Sum of the three waveform lookups, truncated to a byte. Waveforms
    /// are read from RAM because the ARM may rewrite them at run time.
    pub fn three_voice(&self, ram: &BusRam) -> u8 {
        let mut sum: u32 = 0;
        for x in 0..3 {
            let base = ram.waveform(x as u8);
            let shift = self.waveform_size[x] as u32;
            let offset = self.counters[x].checked_shr(shift).unwrap_or(0);
            sum += ram.display_byte(base.wrapping_add(offset) as usize) as u32;
        }
        sum as u8
    }

    /// Rebase the cycle reference after the host counter is reset.
    pub fn cycles_reset(&mut self, host_cycles: u32) {
        self.system_cycles = self.system_cycles.wrapping_sub(host_cycles);
    }

    /// Fractional carry as a fixed-point integer for serialization.
    pub fn encoded_fraction(&self) -> u32 {
        (self.fractional_clocks.clamp(0.0, 1.0) * FRACTION_SCALE) as u32
    }

    pub fn set_encoded_fraction(&mut self, value: u32) {
        self.fractional_clocks = value as f64 / FRACTION_SCALE;
    }
}

impl Default for MusicState {
    fn default() -> Self {
        Self::new()
    }
}

impl CoprocessorHost for MusicState {
    fn set_note(&mut self, channel: u32, frequency: u32) {
        if let Some(f) = self.frequencies.get_mut(channel as usize) {
            *f = frequency;
        }
    }

    fn reset_wave(&mut self, channel: u32) {
        if let Some(c) = self.counters.get_mut(channel as usize) {
            *c = 0;
        }
    }

    fn wave_ptr(&self, channel: u32) -> u32 {
        self.counters.get(channel as usize).copied().unwrap_or(0)
    }

    fn set_wave_size(&mut self, channel: u32, size: u32) {
        if let Some(s) = self.waveform_size.get_mut(channel as usize) {
            *s = size as u8;
        }
    }
}
