//! Test doubles for the external collaborators: a RAM-backed RIOT, a
//! register-file TIA, a tiny 6502-like engine and a faulting ARM.

use std::cell::Cell;
use std::rc::Rc;

use crate::cart::thumb::{Coprocessor, CoprocessorFault, CoprocessorHost};
use crate::cart::CartBus;
use crate::config::BusConfig;
use crate::console::{Advance, Console, Engine};
use crate::debugger::Debugger;
use crate::system::{Peripheral, System, VideoChip};
use crate::{BANK_SIZE, BUS_IMAGE_SIZE};

pub const CYCLES_PER_LINE: u64 = 76;
pub const CYCLES_PER_FRAME: u64 = 262 * CYCLES_PER_LINE;

/// Build a BUS image: "BUS" signatures in the driver, reset vector 0x1000
/// in bank 6, then `patches` as (bank, offset, bytes).
pub fn bus_image(patches: &[(usize, usize, &[u8])]) -> Vec<u8> {
    let mut image = vec![0xEA; BUS_IMAGE_SIZE];
    image[..BANK_SIZE].fill(0);
    image[0x20..0x23].copy_from_slice(b"BUS");
    image[0x40..0x43].copy_from_slice(b"BUS");
    let vector = BANK_SIZE + 6 * BANK_SIZE + 0xFFC;
    image[vector] = 0x00;
    image[vector + 1] = 0x10;
    for (bank, offset, bytes) in patches {
        let base = BANK_SIZE + bank * BANK_SIZE + offset;
        image[base..base + bytes.len()].copy_from_slice(bytes);
    }
    image
}

pub fn console(image: &[u8]) -> Console {
    console_with(CartBus::new(image, &BusConfig::default()))
}

pub fn console_with(cart: CartBus) -> Console {
    let system = System::new(Box::new(cart), Box::new(MockVideo::new()), Box::new(RamPeripheral::new()));
    Console::new(Box::new(MockEngine::new()), system)
}

/// Reset console wrapped in a debugger that has just been entered.
pub fn debugger(image: &[u8]) -> Debugger<Console> {
    let mut c = console(image);
    crate::debugger::Machine::reset(&mut c);
    let mut dbg = Debugger::new(c, &BusConfig::default());
    dbg.set_start_state();
    dbg
}

// ─── RIOT ───────────────────────────────────────────────────────────────────

/// 128 bytes of RAM plus 32 I/O registers. SWCHA/SWCHB read back 0xFF
/// (nothing pressed) until written.
pub struct RamPeripheral {
    ram: [u8; 128],
    io: [u8; 32],
}

impl RamPeripheral {
    pub fn new() -> Self {
        let mut p = RamPeripheral { ram: [0; 128], io: [0; 32] };
        p.reset();
        p
    }
}

impl Peripheral for RamPeripheral {
    fn peek(&mut self, address: u16) -> u8 {
        if address & 0x0200 == 0 { self.ram[(address & 0x7F) as usize] } else { self.io[(address & 0x1F) as usize] }
    }

    fn poke(&mut self, address: u16, value: u8) {
        if address & 0x0200 == 0 {
            self.ram[(address & 0x7F) as usize] = value;
        } else {
            self.io[(address & 0x1F) as usize] = value;
        }
    }

    fn reset(&mut self) {
        self.ram = [0; 128];
        self.io = [0; 32];
        self.io[0] = 0xFF;
        self.io[2] = 0xFF;
    }

    fn save(&self, out: &mut Vec<u8>) -> bool {
        out.extend_from_slice(&self.ram);
        out.extend_from_slice(&self.io);
        true
    }

    fn load(&mut self, input: &[u8]) -> bool {
        if input.len() != 160 { return false; }
        self.ram.copy_from_slice(&input[..128]);
        self.io.copy_from_slice(&input[128..]);
        true
    }
}

// ─── TIA ────────────────────────────────────────────────────────────────────

/// Register file; the "display" is the register file as of the last flush.
pub struct MockVideo {
    regs: [u8; 64],
    display: Vec<u8>,
    pub flushes: u32,
    /// While set, `save` refuses
    fail_save: Rc<Cell<bool>>,
}

impl MockVideo {
    pub fn new() -> Self {
        MockVideo { regs: [0; 64], display: vec![0; 64], flushes: 0, fail_save: Rc::new(Cell::new(false)) }
    }

    /// Handle that makes `save` fail while set, usable after the chip is
    /// boxed into a system.
    pub fn save_switch(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.fail_save)
    }
}

impl Peripheral for MockVideo {
    fn peek(&mut self, address: u16) -> u8 {
        self.regs[(address & 0x3F) as usize]
    }

    fn poke(&mut self, address: u16, value: u8) {
        self.regs[(address & 0x3F) as usize] = value;
    }

    fn reset(&mut self) {
        self.regs = [0; 64];
        // Fire buttons not pressed
        self.regs[0x0C] = 0x80;
        self.regs[0x0D] = 0x80;
    }

    fn save(&self, out: &mut Vec<u8>) -> bool {
        if self.fail_save.get() { return false; }
        out.extend_from_slice(&self.regs);
        true
    }

    fn load(&mut self, input: &[u8]) -> bool {
        if input.len() != self.regs.len() { return false; }
        self.regs.copy_from_slice(input);
        true
    }
}

impl VideoChip for MockVideo {
    fn save_display(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.display);
    }

    fn load_display(&mut self, input: &[u8]) -> bool {
        if input.len() != self.display.len() { return false; }
        self.display.copy_from_slice(input);
        true
    }

    fn flush_line_cache(&mut self) {
        self.display.copy_from_slice(&self.regs);
        self.flushes += 1;
    }
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// LDA #imm, LDA abs, STA abs, JSR abs, RTS; every other opcode is a
/// 2-cycle one-byte NOP. Stack lives in RIOT RAM via the $0100 mirror.
pub struct MockEngine {
    pc: u16,
    sp: u8,
    a: u8,
}

impl MockEngine {
    pub fn new() -> Self {
        MockEngine { pc: 0, sp: 0xFF, a: 0 }
    }

    fn operand16(&self, system: &mut System) -> u16 {
        let lo = system.peek(self.pc.wrapping_add(1));
        let hi = system.peek(self.pc.wrapping_add(2));
        (hi as u16) << 8 | lo as u16
    }

    fn push(&mut self, system: &mut System, value: u8) {
        system.poke(0x0100 | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pull(&mut self, system: &mut System) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        system.peek(0x0100 | self.sp as u16)
    }

    fn execute(&mut self, system: &mut System) {
        let opcode = system.peek(self.pc);
        match opcode {
            0xA9 => {
                self.a = system.peek(self.pc.wrapping_add(1));
                self.pc = self.pc.wrapping_add(2);
                system.tick(2);
            }
            0xAD => {
                let addr = self.operand16(system);
                self.a = system.peek(addr);
                self.pc = self.pc.wrapping_add(3);
                system.tick(4);
            }
            0x8D => {
                let addr = self.operand16(system);
                system.poke(addr, self.a);
                self.pc = self.pc.wrapping_add(3);
                system.tick(4);
            }
            0x20 => {
                let target = self.operand16(system);
                let ret = self.pc.wrapping_add(2);
                self.push(system, (ret >> 8) as u8);
                self.push(system, ret as u8);
                self.pc = target;
                system.tick(6);
            }
            0x60 => {
                let lo = self.pull(system);
                let hi = self.pull(system);
                self.pc = ((hi as u16) << 8 | lo as u16).wrapping_add(1);
                system.tick(6);
            }
            _ => {
                self.pc = self.pc.wrapping_add(1);
                system.tick(2);
            }
        }
        self.pc &= 0x1FFF;
    }

    fn run_cycles(&mut self, system: &mut System, cycles: u64) {
        let target = system.cycles() + cycles;
        while system.cycles() < target {
            self.execute(system);
        }
    }
}

impl Engine for MockEngine {
    fn pc(&self) -> u16 {
        self.pc
    }

    fn advance(&mut self, system: &mut System, mode: Advance) {
        match mode {
            Advance::Step => self.execute(system),
            Advance::UntilPc(target) => {
                for _ in 0..100_000 {
                    self.execute(system);
                    if self.pc == target { break; }
                }
            }
            Advance::Scanline => self.run_cycles(system, CYCLES_PER_LINE),
            Advance::Frame => self.run_cycles(system, CYCLES_PER_FRAME),
        }
    }

    fn reset(&mut self, system: &mut System) {
        let lo = system.peek(0x1FFC);
        let hi = system.peek(0x1FFD);
        self.pc = ((hi as u16) << 8 | lo as u16) & 0x1FFF;
        self.sp = 0xFF;
        self.a = 0;
    }

    fn save(&self, out: &mut Vec<u8>) -> bool {
        bincode::serialize_into(out, &(self.pc, self.sp, self.a)).is_ok()
    }

    fn load(&mut self, input: &[u8]) -> bool {
        match bincode::deserialize::<(u16, u8, u8)>(input) {
            Ok((pc, sp, a)) => {
                self.pc = pc;
                self.sp = sp;
                self.a = a;
                true
            }
            Err(_) => false,
        }
    }
}

// ─── Coprocessor ────────────────────────────────────────────────────────────

/// ARM that faults on every call.
pub struct FaultingArm;

impl Coprocessor for FaultingArm {
    fn run(&mut self, _cycles: i32, _rom: &[u8], _ram: &mut [u8], _host: &mut dyn CoprocessorHost)
        -> Result<(), CoprocessorFault>
    {
        Err(CoprocessorFault::new("undefined instruction", 0x0000_0C10))
    }
}
