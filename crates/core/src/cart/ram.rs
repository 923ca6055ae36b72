//! Harmony/Melody device RAM.
//!
//! 8 KB arena shared by the BUS driver, the ARM code and the 6507 side.
//! Region offsets are fixed by the driver:
//!
//! | Offset        | Content                                      |
//! |---------------|----------------------------------------------|
//! | 0x0000–0x07FF | BUS driver (copied from the ROM image)       |
//! | 0x06D8        | datastream pointers (18 × u32)               |
//! | 0x0720        | datastream increments (18 × u32)             |
//! | 0x0760        | address maps (37 × u32, nibble packed)       |
//! | 0x07F4        | waveform pointers (3 × u32)                  |
//! | 0x0800–0x1FFF | display data                                 |
//!
//! The tables overlap the tail of the driver copy; the driver leaves that
//! space free for them.

use crate::BUS_RAM_SIZE;

/// Datastream pointer table
pub const DSXPTR: usize = 0x06D8;
/// Datastream increment table
pub const DSXINC: usize = 0x0720;
/// Address-map table (overdrive stream selectors)
pub const DSMAPS: usize = 0x0760;
/// Waveform pointer table
pub const WAVEFORM: usize = 0x07F4;
/// Start of display data
pub const DSRAM: usize = 0x0800;
/// Size of the driver copy
pub const DRIVER_SIZE: usize = 0x0800;
/// Display data size
pub const DISPLAY_SIZE: usize = BUS_RAM_SIZE - DSRAM;

/// Device RAM arena with bounds-checked accessors.
#[derive(Clone)]
pub struct BusRam {
    bytes: Box<[u8]>,
}

impl BusRam {
    pub fn new() -> Self {
        BusRam { bytes: vec![0u8; BUS_RAM_SIZE].into_boxed_slice() }
    }

    /// Whole arena.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Display data region.
    #[inline]
    pub fn display(&self) -> &[u8] {
        &self.bytes[DSRAM..]
    }

    /// Read a display byte; out-of-range offsets read as 0.
    #[inline]
    pub fn display_byte(&self, offset: usize) -> u8 {
        self.display().get(offset).copied().unwrap_or(0)
    }

    /// Write a display byte; out-of-range offsets are dropped.
    #[inline]
    pub fn set_display_byte(&mut self, offset: usize, value: u8) {
        if let Some(b) = self.bytes[DSRAM..].get_mut(offset) {
            *b = value;
        }
    }

    /// Little-endian 32-bit word at `offset`.
    #[inline]
    pub fn word(&self, offset: usize) -> u32 {
        match self.bytes.get(offset..offset + 4) {
            Some(b) => u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
            None => 0,
        }
    }

    #[inline]
    pub fn set_word(&mut self, offset: usize, value: u32) {
        if let Some(b) = self.bytes.get_mut(offset..offset + 4) {
            b.copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Copy the driver from the ROM image into the arena.
    pub fn load_driver(&mut self, image: &[u8]) {
        let len = DRIVER_SIZE.min(image.len());
        self.bytes[..len].copy_from_slice(&image[..len]);
    }

    /// Replace the arena contents; fails on a size mismatch.
    pub fn restore(&mut self, data: &[u8]) -> bool {
        if data.len() != self.bytes.len() {
            return false;
        }
        self.bytes.copy_from_slice(data);
        true
    }
}

impl Default for BusRam {
    fn default() -> Self {
        Self::new()
    }
}
