//! Host bus: routes 6507 accesses to the TIA, the RIOT or the cartridge.
//!
//! Owns the host cycle counter and the [`BusContext`] the cartridge reports
//! into. Writes are tracked per 64-byte page so the debugger can tell which
//! regions changed during a step.

use crate::cart::{BusContext, Cartridge};
use crate::config::ConsoleTiming;
use crate::decoder::{self, Target};

/// 13-bit host address space
pub const ADDRESS_SPACE: usize = 0x2000;
/// Page granularity of dirty tracking
pub const PAGE_SHIFT: u16 = 6;
pub const PAGE_COUNT: usize = ADDRESS_SPACE >> PAGE_SHIFT;

/// A memory-mapped chip on the host bus (RIOT, TIA).
pub trait Peripheral {
    fn peek(&mut self, address: u16) -> u8;
    fn poke(&mut self, address: u16, value: u8);
    fn reset(&mut self);
    /// Append this chip's state to `out`.
    fn save(&self, out: &mut Vec<u8>) -> bool;
    fn load(&mut self, input: &[u8]) -> bool;
}

/// The video chip. Besides its registers it holds the framebuffer the
/// debugger snapshots alongside machine state.
pub trait VideoChip: Peripheral {
    fn save_display(&self, out: &mut Vec<u8>);
    fn load_display(&mut self, input: &[u8]) -> bool;
    /// Render any partially drawn scanline so the debugger shows it.
    fn flush_line_cache(&mut self);
}

/// Host bus.
pub struct System {
    cart: Box<dyn Cartridge>,
    tia: Box<dyn VideoChip>,
    riot: Box<dyn Peripheral>,
    ctx: BusContext,
    /// Pages written since the last clear
    dirty: [bool; PAGE_COUNT],
}

impl System {
    pub fn new(cart: Box<dyn Cartridge>, tia: Box<dyn VideoChip>, riot: Box<dyn Peripheral>) -> Self {
        System {
            cart,
            tia,
            riot,
            ctx: BusContext::new(),
            dirty: [false; PAGE_COUNT],
        }
    }

    // ─── Bus access ─────────────────────────────────────────────────────

    pub fn peek(&mut self, address: u16) -> u8 {
        match decoder::decode(address) {
            Target::Riot => self.riot.peek(address),
            Target::Tia => self.tia.peek(address),
            Target::Open => 0,
            Target::Cart(_) => self.cart.peek(address, &mut self.ctx),
        }
    }

    /// Write to the bus. Returns true if the write switched cartridge banks.
    pub fn poke(&mut self, address: u16, value: u8) -> bool {
        let address = address & 0x1FFF;
        self.dirty[(address >> PAGE_SHIFT) as usize] = true;

        match decoder::decode(address) {
            Target::Cart(_) => self.cart.poke(address, value, &mut self.ctx),
            target => {
                // The cartridge sees every bus cycle and may pull lines low
                let value = value & self.cart.bus_overdrive(address);
                match target {
                    Target::Riot => self.riot.poke(address, value),
                    Target::Tia => self.tia.poke(address, value),
                    _ => {}
                }
                false
            }
        }
    }

    // ─── Cycles ─────────────────────────────────────────────────────────

    #[inline]
    pub fn tick(&mut self, cycles: u64) {
        self.ctx.cycles += cycles;
    }

    #[inline]
    pub fn cycles(&self) -> u64 {
        self.ctx.cycles
    }

    pub fn set_cycles(&mut self, cycles: u64) {
        self.ctx.cycles = cycles;
    }

    /// Restart the cycle counter from zero, letting the cartridge rebase.
    pub fn reset_cycles(&mut self) {
        self.cart.system_cycles_reset(self.ctx.cycles);
        self.ctx.cycles = 0;
    }

    pub fn set_console_timing(&mut self, timing: ConsoleTiming) {
        self.cart.console_timing_changed(timing);
    }

    // ─── Debugger support ───────────────────────────────────────────────

    pub fn lock_bankswitch_state(&mut self) {
        self.cart.lock_bank();
    }

    pub fn unlock_bankswitch_state(&mut self) {
        self.cart.unlock_bank();
    }

    pub fn clear_dirty_pages(&mut self) {
        self.dirty = [false; PAGE_COUNT];
    }

    pub fn is_page_dirty(&self, address: u16) -> bool {
        self.dirty[((address & 0x1FFF) >> PAGE_SHIFT) as usize]
    }

    pub fn take_fatal_error(&mut self) -> Option<String> {
        self.ctx.take_fatal()
    }

    pub fn set_autodetect(&mut self, on: bool) {
        self.ctx.autodetect = on;
    }

    pub fn reset(&mut self) {
        self.riot.reset();
        self.tia.reset();
        self.cart.reset(&mut self.ctx);
        self.clear_dirty_pages();
    }

    // ─── Components ─────────────────────────────────────────────────────

    pub fn cart(&self) -> &dyn Cartridge {
        self.cart.as_ref()
    }

    pub fn cart_mut(&mut self) -> &mut dyn Cartridge {
        self.cart.as_mut()
    }

    pub fn tia(&self) -> &dyn VideoChip {
        self.tia.as_ref()
    }

    pub fn tia_mut(&mut self) -> &mut dyn VideoChip {
        self.tia.as_mut()
    }

    pub fn riot(&self) -> &dyn Peripheral {
        self.riot.as_ref()
    }

    pub fn riot_mut(&mut self) -> &mut dyn Peripheral {
        self.riot.as_mut()
    }

    pub fn context(&self) -> &BusContext {
        &self.ctx
    }
}
