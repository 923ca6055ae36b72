//! Cartridge hardware.
//!
//! - [`Cartridge`] — capability interface every bank-switching scheme
//!   implements; the host bus only talks to this trait
//! - [`CartBus`] — the BUS scheme (Harmony/Melody with ARM driver)
//! - [`BusContext`] — explicit handle for host cycle count, autodetect
//!   state and fatal-error reporting, passed into every cartridge call
//!
//! Supporting pieces: device RAM arena ([`ram`]), datastream fetchers
//! ([`datastream`]), music fetchers ([`audio`]) and the ARM bridge
//! ([`thumb`]).

pub mod audio;
pub mod bus;
pub mod datastream;
pub mod ram;
pub mod thumb;

pub use bus::{is_probably_bus, CartBus};

use crate::config::ConsoleTiming;

/// Execution context handed to the cartridge on every access.
///
/// Replaces a global debugger: the cartridge reads the host cycle count and
/// probe state from here and reports fatal errors into it. The owner (the
/// host bus) decides where those errors go.
#[derive(Debug, Default)]
pub struct BusContext {
    /// 6507 cycles since power-on
    pub cycles: u64,
    /// True while heuristic format detection is probing the image
    pub autodetect: bool,
    fatal: Option<String>,
}

impl BusContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host cycle counter truncated to the 32-bit width the cartridge
    /// keeps in its save state.
    #[inline]
    pub fn cycles32(&self) -> u32 {
        self.cycles as u32
    }

    /// Report an unrecoverable emulation error. The first report wins until
    /// it is taken.
    pub fn report_fatal(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("{}", message);
        if self.fatal.is_none() {
            self.fatal = Some(message);
        }
    }

    /// Take the pending fatal error, if any.
    pub fn take_fatal(&mut self) -> Option<String> {
        self.fatal.take()
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }
}

/// Common interface of cartridge bank-switching schemes.
pub trait Cartridge {
    /// Tag written at the start of the save state; must match on load.
    fn name(&self) -> &'static str;

    /// Power-on / reset state.
    fn reset(&mut self, ctx: &mut BusContext);

    /// Read through the cartridge window (A12 set).
    fn peek(&mut self, address: u16, ctx: &mut BusContext) -> u8;

    /// Write through the cartridge window. Returns true if the write
    /// switched banks.
    fn poke(&mut self, address: u16, value: u8, ctx: &mut BusContext) -> bool;

    /// Mask applied to a write in peripheral space (A12 clear). Schemes
    /// that can pull data lines low return something other than 0xFF.
    fn bus_overdrive(&mut self, _address: u16) -> u8 {
        0xFF
    }

    /// Switch to `bank`. Returns false when the bank is locked.
    fn bank(&mut self, bank: u16) -> bool;

    fn current_bank(&self) -> u16;

    fn bank_count(&self) -> u16;

    /// Debugger write into ROM. Returns false if the address is protected
    /// or the bank is locked.
    fn patch(&mut self, address: u16, value: u8) -> bool;

    /// Append this cartridge's state to `out`.
    fn save(&self, out: &mut Vec<u8>) -> bool;

    /// Restore state written by [`Cartridge::save`]. Leaves the cartridge
    /// untouched and returns false on any mismatch.
    fn load(&mut self, input: &[u8]) -> bool;

    /// Full ROM image.
    fn image(&self) -> &[u8];

    /// Cartridge-side RAM, for debugger views.
    fn internal_ram(&self) -> &[u8] {
        &[]
    }

    fn console_timing_changed(&mut self, _timing: ConsoleTiming) {}

    /// The host cycle counter is about to restart from zero.
    fn system_cycles_reset(&mut self, _cycles: u64) {}

    fn lock_bank(&mut self);
    fn unlock_bank(&mut self);
    fn bank_locked(&self) -> bool;

    /// True if the bank changed (or ROM was patched) since the last call.
    fn bank_changed(&mut self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fatal_wins() {
        let mut ctx = BusContext::new();
        assert!(!ctx.has_fatal());
        ctx.report_fatal("one");
        ctx.report_fatal("two");
        assert_eq!(ctx.take_fatal().as_deref(), Some("one"));
        assert!(ctx.take_fatal().is_none());
    }
}
