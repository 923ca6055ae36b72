//! Debugger control layer.
//!
//! - **Step engine**: step, trace (JSR as one instruction), scanline and
//!   frame advance, all bracketed by a bank-lock release so only the
//!   emulated CPU can switch banks
//! - **Breakpoints / traps**: lazily allocated address bitsets
//! - **Functions**: built-in input tests plus user expressions
//! - **Rewind**: every advance pushes the prior state into a ring
//! - **RAM viewer**: hex dump and diff of the cartridge RAM
//!
//! Command-line parsing is an external [`CommandParser`]; every operation
//! is also callable directly.

pub mod breakpoints;
pub mod functions;

pub use breakpoints::PackedBitArray;
pub use functions::{Expression, FunctionRegistry};

use std::path::Path;

use crate::cart::Cartridge;
use crate::config::BusConfig;
use crate::console::Advance;
use crate::savestate::{self, SaveState, KIND_BUS};
use crate::snapshot::RewindManager;

/// Opcode of JSR abs
const OP_JSR: u8 = 0x20;

/// What the debugger needs from the emulated machine.
pub trait Machine {
    /// Host cycles since power-on.
    fn cycles(&self) -> u64;
    fn pc(&self) -> u16;
    fn peek(&mut self, address: u16) -> u8;
    fn poke(&mut self, address: u16, value: u8);
    fn advance(&mut self, mode: Advance);
    fn flush_line_cache(&mut self);
    fn clear_dirty_pages(&mut self);
    fn lock_bankswitch_state(&mut self);
    fn unlock_bankswitch_state(&mut self);
    fn cartridge(&self) -> &dyn Cartridge;
    fn cartridge_mut(&mut self) -> &mut dyn Cartridge;
    fn reset(&mut self);
    /// Encode the whole machine into `out`.
    fn save_state(&self, out: &mut Vec<u8>) -> bool;
    /// Restore a state from [`Machine::save_state`]; all or nothing.
    fn load_state(&mut self, input: &[u8]) -> bool;
    fn save_display(&self, out: &mut Vec<u8>);
    fn load_display(&mut self, input: &[u8]) -> bool;
    fn take_fatal_error(&mut self) -> Option<String>;
}

/// Executes text commands against a debugger.
pub trait CommandParser<M: Machine> {
    fn run(&mut self, debugger: &mut Debugger<M>, command: &str) -> String;
}

/// Whether the debugger holds the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Machine runs freely; bank switching unlocked
    Idle,
    /// Debugger entered; the machine only moves through step operations
    Stepping,
}

/// State captured before each operation, for change highlighting.
#[derive(Debug, Clone, Default)]
pub struct OldState {
    pub pc: u16,
    pub bank: u16,
    pub cycles: u64,
    pub cart_ram: Vec<u8>,
}

/// Debugger for a BUS machine.
pub struct Debugger<M: Machine> {
    machine: M,
    state: StepState,
    breakpoints: PackedBitArray,
    read_traps: PackedBitArray,
    write_traps: PackedBitArray,
    functions: FunctionRegistry,
    rewind: RewindManager,
    old: OldState,
    /// Why the debugger was entered
    message: String,
    fatal: Option<String>,
    /// Disassembly must be regenerated (bank switch or ROM patch)
    rom_invalid: bool,
}

impl<M: Machine> Debugger<M> {
    pub fn new(machine: M, config: &BusConfig) -> Self {
        Debugger {
            machine,
            state: StepState::Idle,
            breakpoints: PackedBitArray::new(),
            read_traps: PackedBitArray::new(),
            write_traps: PackedBitArray::new(),
            functions: FunctionRegistry::new(),
            rewind: RewindManager::new(config.rewind_capacity),
            old: OldState::default(),
            message: String::new(),
            fatal: None,
            rom_invalid: true,
        }
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn into_machine(self) -> M {
        self.machine
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    // ─── Entry / exit ───────────────────────────────────────────────────

    /// Enter the debugger; `address` is appended to the message in hex.
    pub fn start(&mut self, message: &str, address: Option<u16>) {
        self.message = match address {
            Some(a) => format!("{}{:04X}", message, a),
            None => message.to_string(),
        };
        self.set_start_state();
    }

    /// Enter the debugger because emulation cannot continue.
    pub fn start_with_fatal_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("entering debugger: {}", message);
        self.message = message.clone();
        self.fatal = Some(message);
        self.set_start_state();
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn fatal_error(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    /// Hold the machine: lock banks, start a new rewind list, remember the
    /// current state without making it a rewind level.
    pub fn set_start_state(&mut self) {
        self.machine.lock_bankswitch_state();
        self.rewind.clear();
        self.save_old_state(false);
        self.rom_invalid = true;
        self.state = StepState::Stepping;
    }

    /// Release the machine and execute one instruction, which moves it off
    /// a breakpoint or trap it is sitting on.
    pub fn set_quit_state(&mut self) {
        self.machine.unlock_bankswitch_state();
        self.machine.advance(Advance::Step);
        self.state = StepState::Idle;
        self.check_fatal();
    }

    // ─── Step engine ────────────────────────────────────────────────────

    fn save_old_state(&mut self, add_rewind: bool) {
        self.old.pc = self.machine.pc();
        self.old.bank = self.machine.cartridge().current_bank();
        self.old.cycles = self.machine.cycles();
        self.old.cart_ram.clear();
        self.old.cart_ram.extend_from_slice(self.machine.cartridge().internal_ram());

        if add_rewind {
            self.rewind.add_state(&self.machine);
        }
    }

    fn check_fatal(&mut self) {
        if let Some(message) = self.machine.take_fatal_error() {
            self.start_with_fatal_error(message);
        }
    }

    fn after_advance(&mut self) {
        if self.machine.cartridge_mut().bank_changed() {
            self.rom_invalid = true;
        }
        self.check_fatal();
    }

    /// Advance `count` times with banks unlocked. Returns elapsed cycles.
    fn run_unlocked(&mut self, mode: Advance, count: u32) -> u64 {
        self.save_old_state(true);
        self.machine.clear_dirty_pages();

        let start = self.machine.cycles();
        self.machine.unlock_bankswitch_state();
        for _ in 0..count {
            self.machine.advance(mode);
        }
        self.machine.lock_bankswitch_state();

        self.after_advance();
        self.machine.cycles().wrapping_sub(start)
    }

    /// Execute one instruction. Returns elapsed host cycles.
    pub fn step(&mut self) -> u64 {
        let cycles = self.run_unlocked(Advance::Step, 1);
        self.machine.flush_line_cache();
        cycles
    }

    /// Like [`step`](Self::step), but a JSR runs until the return address.
    /// Only the PC is watched, so recursion is not handled.
    pub fn trace(&mut self) -> u64 {
        let pc = self.machine.pc();
        // Banks are locked here, so this peek has no side effects
        if self.machine.peek(pc) != OP_JSR {
            return self.step();
        }
        let cycles = self.run_unlocked(Advance::UntilPc(pc.wrapping_add(3)), 1);
        self.machine.flush_line_cache();
        cycles
    }

    pub fn next_scanline(&mut self, lines: u32) {
        self.run_unlocked(Advance::Scanline, lines);
        self.machine.flush_line_cache();
    }

    pub fn next_frame(&mut self, frames: u32) {
        self.run_unlocked(Advance::Frame, frames);
    }

    /// Go back one rewind level. Returns false if there is none.
    pub fn rewind_state(&mut self) -> bool {
        self.machine.clear_dirty_pages();

        self.machine.unlock_bankswitch_state();
        let result = self.rewind.rewind_state(&mut self.machine);
        self.machine.lock_bankswitch_state();

        if result {
            self.rom_invalid = true;
        }
        result
    }

    pub fn rewind_levels(&self) -> usize {
        self.rewind.len()
    }

    pub fn reset(&mut self) {
        self.machine.unlock_bankswitch_state();
        self.machine.reset();
        self.machine.lock_bankswitch_state();
        self.rom_invalid = true;
    }

    // ─── Save states ────────────────────────────────────────────────────

    pub fn save_state_file(&mut self, path: &Path) -> bool {
        self.machine.clear_dirty_pages();

        self.machine.unlock_bankswitch_state();
        let mut state = SaveState::default();
        let ok = self.machine.save_state(&mut state.machine);
        self.machine.save_display(&mut state.display);
        self.machine.lock_bankswitch_state();

        if !ok {
            log::warn!("save state: could not serialize machine");
            return false;
        }
        match savestate::save_to_file(&state, KIND_BUS, path) {
            Ok(()) => {
                log::info!("state saved to {}", path.display());
                true
            }
            Err(e) => {
                log::warn!("save state: {}", e);
                false
            }
        }
    }

    pub fn load_state_file(&mut self, path: &Path) -> bool {
        self.machine.clear_dirty_pages();

        let state = match savestate::load_from_file(path, KIND_BUS) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("load state: {}", e);
                return false;
            }
        };

        self.machine.unlock_bankswitch_state();
        let ok = self.machine.load_state(&state.machine);
        if ok {
            self.machine.load_display(&state.display);
        }
        self.machine.lock_bankswitch_state();

        if ok {
            log::info!("state loaded from {}", path.display());
            self.rom_invalid = true;
        } else {
            log::warn!("load state: state does not match this machine");
        }
        ok
    }

    // ─── Breakpoints and traps ──────────────────────────────────────────

    pub fn toggle_breakpoint(&mut self, address: u16) {
        self.breakpoints.toggle(address);
    }

    pub fn set_breakpoint(&mut self, address: u16, set: bool) {
        self.breakpoints.initialize();
        if set { self.breakpoints.set(address) } else { self.breakpoints.clear(address) }
    }

    pub fn breakpoint(&self, address: u16) -> bool {
        self.breakpoints.is_set(address)
    }

    pub fn breakpoints(&self) -> &PackedBitArray {
        &self.breakpoints
    }

    pub fn clear_all_breakpoints(&mut self) {
        self.breakpoints.clear_all();
    }

    pub fn toggle_read_trap(&mut self, address: u16) {
        self.read_traps.toggle(address);
    }

    pub fn toggle_write_trap(&mut self, address: u16) {
        self.write_traps.toggle(address);
    }

    /// Toggle both the read and the write trap.
    pub fn toggle_trap(&mut self, address: u16) {
        self.toggle_read_trap(address);
        self.toggle_write_trap(address);
    }

    pub fn read_trap(&self, address: u16) -> bool {
        self.read_traps.is_initialized() && self.read_traps.is_set(address)
    }

    pub fn write_trap(&self, address: u16) -> bool {
        self.write_traps.is_initialized() && self.write_traps.is_set(address)
    }

    pub fn clear_all_traps(&mut self) {
        self.read_traps.clear_all();
        self.write_traps.clear_all();
    }

    // ─── Memory ─────────────────────────────────────────────────────────

    /// Write into ROM at `address` in the current bank.
    pub fn patch_rom(&mut self, address: u16, value: u8) -> bool {
        self.machine.unlock_bankswitch_state();
        let ok = self.machine.cartridge_mut().patch(address, value);
        self.machine.lock_bankswitch_state();
        if ok {
            self.machine.cartridge_mut().bank_changed();
            self.rom_invalid = true;
        }
        ok
    }

    /// Poke `values` into consecutive addresses starting at `address`.
    pub fn set_ram(&mut self, address: u16, values: &[u8]) -> String {
        let mut addr = address;
        for &v in values {
            self.machine.poke(addr, v);
            addr = addr.wrapping_add(1);
        }
        let n = values.len();
        format!("changed {} location{}", n, if n == 1 { "" } else { "s" })
    }

    pub fn old_state(&self) -> &OldState {
        &self.old
    }

    /// Hex + ASCII dump of cartridge RAM.
    pub fn dump_cart_ram(&self, start: u16, length: u16) -> String {
        dump_ram(self.machine.cartridge().internal_ram(), start, length)
    }

    /// Cartridge RAM bytes that changed since the last operation.
    pub fn cart_ram_changes(&self, start: u16, length: u16) -> String {
        dump_ram_diff(&self.old.cart_ram, self.machine.cartridge().internal_ram(), start, length)
    }

    /// Disassembly needs regenerating. Reading clears the flag.
    pub fn take_rom_invalid(&mut self) -> bool {
        std::mem::take(&mut self.rom_invalid)
    }

    // ─── Functions ──────────────────────────────────────────────────────

    pub fn add_function(&mut self, name: &str, definition: &str, expression: Expression) -> bool {
        self.functions.add(name, definition, expression)
    }

    pub fn del_function(&mut self, name: &str) -> bool {
        self.functions.remove(name)
    }

    pub fn get_function(&self, name: &str) -> &Expression {
        self.functions.get(name)
    }

    pub fn get_function_def(&self, name: &str) -> &str {
        self.functions.definition(name)
    }

    pub fn function_defs(&self) -> Vec<(String, String)> {
        self.functions.definitions()
    }

    pub fn builtin_help(&self) -> String {
        functions::builtin_help()
    }

    pub fn completions(&self, prefix: &str) -> Vec<String> {
        self.functions.completions(prefix)
    }

    /// Evaluate a function against the live machine. Reads go through the
    /// bus while banks are locked.
    pub fn evaluate_function(&mut self, name: &str) -> i32 {
        let machine = &mut self.machine;
        self.functions.get(name).evaluate(&mut |addr: u16| machine.peek(addr))
    }

    // ─── Commands ───────────────────────────────────────────────────────

    pub fn run(&mut self, parser: &mut dyn CommandParser<M>, command: &str) -> String {
        parser.run(self, command)
    }
}

/// Two hex digits, wrapped in DEL markers when `value` differs from `old`
/// so a widget can highlight it.
pub fn inv_if_changed(value: u8, old: u8) -> String {
    if value != old {
        format!("\u{7f}{:02x}\u{7f}", value)
    } else {
        format!("{:02x}", value)
    }
}

// ─── RAM Viewer ─────────────────────────────────────────────────────────────

/// Format a hex + ASCII dump.
///
/// Outputs 16 bytes per line with address, hex values, and ASCII printable chars.
pub fn dump_ram(data: &[u8], start: u16, length: u16) -> String {
    let mut s = String::new();
    let end = (start as usize + length as usize).min(data.len());
    let mut addr = start as usize;
    while addr < end {
        let line_end = (addr + 16).min(end);
        s.push_str(&format!("{:04X}: ", addr));
        for i in addr..addr + 16 {
            if i < line_end {
                s.push_str(&format!("{:02X} ", data[i]));
            } else {
                s.push_str("   ");
            }
            if i == addr + 7 { s.push(' '); }
        }
        s.push(' ');
        for &c in &data[addr..line_end] {
            s.push(if (0x20..0x7F).contains(&c) { c as char } else { '.' });
        }
        s.push('\n');
        addr += 16;
    }
    s
}

/// Format only the bytes that differ between two captures.
pub fn dump_ram_diff(old: &[u8], new: &[u8], start: u16, length: u16) -> String {
    let mut s = String::new();
    let end = (start as usize + length as usize).min(old.len().min(new.len()));
    let start = (start as usize).min(end);
    for (i, (o, n)) in old[start..end].iter().zip(&new[start..end]).enumerate() {
        if o != n {
            s.push_str(&format!("  0x{:04X}: {:02X} → {:02X}\n", start + i, o, n));
        }
    }
    if s.is_empty() { s.push_str("  (no changes)\n"); }
    s
}
