//! The whole emulated machine: CPU/video engine plus host bus.
//!
//! The engine (6507 core + TIA timing) is an external collaborator behind
//! [`Engine`]; the console only sequences it and gathers component state
//! into a [`ConsoleState`] snapshot.

use crate::cart::Cartridge;
use crate::debugger::Machine;
use crate::savestate::ConsoleState;
use crate::system::System;

/// How far an engine advances in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// One instruction
    Step,
    /// Instructions until the PC equals the given address
    UntilPc(u16),
    /// One scanline
    Scanline,
    /// One frame
    Frame,
}

/// CPU core plus the TIA's beam timing.
pub trait Engine {
    fn pc(&self) -> u16;
    fn advance(&mut self, system: &mut System, mode: Advance);
    fn reset(&mut self, system: &mut System);
    fn save(&self, out: &mut Vec<u8>) -> bool;
    fn load(&mut self, input: &[u8]) -> bool;
}

/// Emulated console.
pub struct Console {
    engine: Box<dyn Engine>,
    system: System,
}

impl Console {
    pub fn new(engine: Box<dyn Engine>, system: System) -> Self {
        Console { engine, system }
    }

    pub fn system(&self) -> &System {
        &self.system
    }

    pub fn system_mut(&mut self) -> &mut System {
        &mut self.system
    }

    fn snapshot(&self) -> Option<ConsoleState> {
        let mut state = ConsoleState { cycles: self.system.cycles(), ..ConsoleState::default() };
        let ok = self.engine.save(&mut state.engine)
            && self.system.riot().save(&mut state.riot)
            && self.system.tia().save(&mut state.tia)
            && self.system.cart().save(&mut state.cart);
        if ok { Some(state) } else { None }
    }

    /// Apply a decoded snapshot. The cartridge goes first so a record from
    /// another scheme is rejected before anything else changes.
    fn apply(&mut self, state: &ConsoleState) -> bool {
        if !self.system.cart_mut().load(&state.cart) {
            return false;
        }
        let ok = self.engine.load(&state.engine)
            && self.system.riot_mut().load(&state.riot)
            && self.system.tia_mut().load(&state.tia);
        if ok {
            self.system.set_cycles(state.cycles);
        }
        ok
    }
}

impl Machine for Console {
    fn cycles(&self) -> u64 {
        self.system.cycles()
    }

    fn pc(&self) -> u16 {
        self.engine.pc()
    }

    fn peek(&mut self, address: u16) -> u8 {
        self.system.peek(address)
    }

    fn poke(&mut self, address: u16, value: u8) {
        self.system.poke(address, value);
    }

    fn advance(&mut self, mode: Advance) {
        self.engine.advance(&mut self.system, mode);
    }

    fn flush_line_cache(&mut self) {
        self.system.tia_mut().flush_line_cache();
    }

    fn clear_dirty_pages(&mut self) {
        self.system.clear_dirty_pages();
    }

    fn lock_bankswitch_state(&mut self) {
        self.system.lock_bankswitch_state();
    }

    fn unlock_bankswitch_state(&mut self) {
        self.system.unlock_bankswitch_state();
    }

    fn cartridge(&self) -> &dyn Cartridge {
        self.system.cart()
    }

    fn cartridge_mut(&mut self) -> &mut dyn Cartridge {
        self.system.cart_mut()
    }

    fn reset(&mut self) {
        self.system.reset();
        self.engine.reset(&mut self.system);
    }

    fn save_state(&self, out: &mut Vec<u8>) -> bool {
        match self.snapshot() {
            Some(state) => state.encode(out),
            None => false,
        }
    }

    fn load_state(&mut self, input: &[u8]) -> bool {
        let Some(state) = ConsoleState::decode(input) else {
            log::warn!("load_state: malformed snapshot");
            return false;
        };
        let backup = self.snapshot();
        if self.apply(&state) {
            return true;
        }
        // A later component refused: put back what was already applied
        if let Some(backup) = backup {
            if !self.apply(&backup) {
                log::error!("load_state: could not restore previous state");
            }
        }
        false
    }

    fn save_display(&self, out: &mut Vec<u8>) {
        self.system.tia().save_display(out);
    }

    fn load_display(&mut self, input: &[u8]) -> bool {
        self.system.tia_mut().load_display(input)
    }

    fn take_fatal_error(&mut self) -> Option<String> {
        self.system.take_fatal_error()
    }
}
