//! Datastream fetchers.
//!
//! Each stream is a 32-bit fixed-point pointer into display data plus an
//! increment. Layouts:
//!
//! ```text
//! pointer:   PPPFF---   P = byte offset (12 bits), F = fraction
//! increment: ----IIFF   I = whole step, F = fraction
//! ```
//!
//! Streams 0..=15 are general data streams selected through the address
//! maps; [`COMMSTREAM`] backs DSREAD/DSWRITE and [`JUMPSTREAM`] feeds the
//! fast-jump operands.

use super::ram::{BusRam, DSMAPS, DSXINC, DSXPTR, WAVEFORM};

/// Stream used by the DSREAD/DSWRITE/DSPTR hotspots
pub const COMMSTREAM: u8 = 0x10;
/// Stream used for JMP $0000 operand substitution
pub const JUMPSTREAM: u8 = 0x11;
/// Pointer step of one whole byte
pub const POINTER_STEP: u32 = 0x0010_0000;
/// Encoded base of waveform pointers as seen by the ARM
pub const WAVEFORM_BASE: u32 = 0x4000_0800;

impl BusRam {
    pub fn datastream_pointer(&self, index: u8) -> u32 {
        self.word(DSXPTR + index as usize * 4)
    }

    pub fn set_datastream_pointer(&mut self, index: u8, value: u32) {
        self.set_word(DSXPTR + index as usize * 4, value);
    }

    pub fn datastream_increment(&self, index: u8) -> u32 {
        self.word(DSXINC + index as usize * 4)
    }

    pub fn set_datastream_increment(&mut self, index: u8, value: u32) {
        self.set_word(DSXINC + index as usize * 4, value);
    }

    pub fn address_map(&self, index: u8) -> u32 {
        self.word(DSMAPS + index as usize * 4)
    }

    pub fn set_address_map(&mut self, index: u8, value: u32) {
        self.set_word(DSMAPS + index as usize * 4, value);
    }

    /// Display offset of waveform `index`; anything outside 4 KB maps to 0.
    pub fn waveform(&self, index: u8) -> u32 {
        let result = self.word(WAVEFORM + index as usize * 4).wrapping_sub(WAVEFORM_BASE);
        if result >= 4096 { 0 } else { result }
    }

    /// Raw digital sample base (waveform slot 0, not rebased).
    pub fn sample(&self) -> u32 {
        self.word(WAVEFORM)
    }

    /// Fetch one byte from a stream and advance it by its increment.
    ///
    /// Only the low 16 bits of the increment are used.
    pub fn read_from_datastream(&mut self, index: u8) -> u8 {
        let pointer = self.datastream_pointer(index);
        let increment = self.datastream_increment(index) as u16 as u32;
        let value = self.display_byte((pointer >> 20) as usize);
        self.set_datastream_pointer(index, pointer.wrapping_add(increment << 12));
        value
    }

    /// Fetch one byte from a stream and advance it by exactly one byte.
    pub fn read_from_datastream_unit(&mut self, index: u8) -> u8 {
        let pointer = self.datastream_pointer(index);
        let value = self.display_byte((pointer >> 20) as usize);
        self.set_datastream_pointer(index, pointer.wrapping_add(POINTER_STEP));
        value
    }

    /// Store one byte at a stream's cursor and advance it by one byte.
    pub fn write_to_datastream(&mut self, index: u8, value: u8) {
        let pointer = self.datastream_pointer(index);
        self.set_display_byte((pointer >> 20) as usize, value);
        self.set_datastream_pointer(index, pointer.wrapping_add(POINTER_STEP));
    }

    /// DSPTR: shift the pointer left a byte, keep the top nibble, merge
    /// `value` into the next eight bits.
    pub fn shift_datastream_pointer(&mut self, index: u8, value: u8) {
        let pointer = self.datastream_pointer(index);
        let pointer = ((pointer << 8) & 0xF000_0000) | ((value as u32) << 20);
        self.set_datastream_pointer(index, pointer);
    }

    /// Select the stream for overdriven register `map`, read from it and
    /// rotate the map's selectors right by one nibble.
    pub fn read_mapped_datastream(&mut self, map: u8) -> u8 {
        let all = self.address_map(map);
        let stream = (all & 0x0F) as u8;
        let value = self.read_from_datastream(stream);
        self.set_address_map(map, (all >> 4) | ((stream as u32) << 28));
        value
    }
}
