//! BUS bank-switching scheme (Harmony/Melody board).
//!
//! 32 KB image: 2 KB BUS driver + 2 KB C code, then seven 4 KB banks for
//! the 6507. The driver is copied into 8 KB of device RAM on reset; the
//! ARM side keeps its datastream tables and display data there.
//!
//! ## Hotspots (offsets within the 4 KB window)
//!
//! | Offset      | Name      | Access |
//! |-------------|-----------|--------|
//! | 0xFEE       | AMPLITUDE | read   |
//! | 0xFEF       | DSREAD    | read   |
//! | 0xFF0       | DSWRITE   | write  |
//! | 0xFF1       | DSPTR     | write  |
//! | 0xFF2       | SETMODE   | write  |
//! | 0xFF3       | CALLFN    | write  |
//! | 0xFF5–0xFFB | bank 0–6  | both   |
//!
//! ## Bus stuffing
//!
//! With the low mode nibble clear, the cartridge snoops the 6507's opcode
//! fetches:
//!
//! - `JMP $0000` — the two operand fetches are served from [`JUMPSTREAM`]
//!   so the ARM can steer control flow without rewriting ROM.
//! - `STY zp` (0x84) — the operand fetch records the zero-page target; the
//!   following TIA write is ANDed with a byte from the datastream the
//!   address map selects for that register (the 6507 writes $FF, so the
//!   stream byte is what lands).

use serde::{Deserialize, Serialize};

use super::audio::MusicState;
use super::datastream::{COMMSTREAM, JUMPSTREAM};
use super::ram::{BusRam, DRIVER_SIZE};
use super::thumb::{Coprocessor, CALLFN_RUN, CALLFN_RUN_IRQ};
use super::{BusContext, Cartridge};
use crate::config::{BusConfig, ConsoleTiming};
use crate::{BANK_SIZE, BUS_IMAGE_SIZE, BUS_RAM_SIZE};

/// Save-state tag
pub const NAME: &str = "CartridgeBUS";
/// Number of 6507-visible banks
pub const BANK_COUNT: u16 = 7;
/// First window offset that maps plain ROM; below it the driver hotspot
/// page lives and patches are refused.
pub const PATCH_MIN: u16 = 0x0040;

const AMPLITUDE: u16 = 0xFEE;
const DSREAD: u16 = 0xFEF;
const DSWRITE: u16 = 0xFF0;
const DSPTR: u16 = 0xFF1;
const SETMODE: u16 = 0xFF2;
const CALLFN: u16 = 0xFF3;
const BANK0: u16 = 0xFF5;
const BANK6: u16 = 0xFFB;

const OP_JMP_ABS: u8 = 0x4C;
const OP_STY_ZP: u8 = 0x84;

/// Overdrive off
const NO_OVERDRIVE: u16 = 0xFF;
/// Highest TIA register the address maps cover (VSYNC..HMBL)
const LAST_MAPPED_REG: u8 = 0x24;

/// Serialized BUS state. Field order is the save-state format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusState {
    pub name: String,
    pub bank: u16,
    pub ram: Vec<u8>,
    pub bus_overdrive_address: u16,
    pub sty_zero_page_address: u16,
    pub jmp_operand_address: u16,
    pub system_cycles: u32,
    /// Fractional oscillator clocks × 10^8
    pub fractional_clocks: u32,
    pub arm_cycles: u32,
    pub music_counters: [u32; 3],
    pub music_frequencies: [u32; 3],
    pub music_waveform_size: [u8; 3],
    pub mode: u8,
    pub fast_jump_active: u8,
}

/// BUS cartridge.
pub struct CartBus {
    /// Full 32 KB ROM image (driver + C code + 28 KB of 6507 banks)
    image: Box<[u8]>,
    /// Harmony RAM
    ram: BusRam,
    /// Music fetchers (also the coprocessor callback target)
    music: MusicState,
    /// ARM interpreter, if one is attached
    coprocessor: Option<Box<dyn Coprocessor>>,
    current_bank: u16,
    start_bank: u16,
    /// Low nibble 0 = bus stuffing on, high nibble 0 = digital audio on
    mode: u8,
    /// 6507 cycle count at the last ARM call
    arm_cycles: u32,
    /// Zero-page address whose next write gets overdriven
    bus_overdrive_address: u16,
    /// Window offset of a pending STY operand fetch
    sty_zero_page_address: u16,
    /// Window offset of the next JMP operand byte to substitute
    jmp_operand_address: u16,
    /// Operand bytes left to serve from JUMPSTREAM (0..=2)
    fast_jump_active: u8,
    bank_locked: bool,
    bank_changed: bool,
    ram_random: bool,
    rng_state: u32,
    /// Video standard handed to the coprocessor
    timing: ConsoleTiming,
}

impl CartBus {
    /// Create a BUS cartridge from a ROM image (truncated or zero-padded to
    /// 32 KB).
    pub fn new(image: &[u8], config: &BusConfig) -> Self {
        let mut buf = vec![0u8; BUS_IMAGE_SIZE];
        let len = image.len().min(BUS_IMAGE_SIZE);
        buf[..len].copy_from_slice(&image[..len]);

        let start_bank = config.start_bank.min(BANK_COUNT - 1);
        let mut cart = CartBus {
            image: buf.into_boxed_slice(),
            ram: BusRam::new(),
            music: MusicState::new(),
            coprocessor: None,
            current_bank: start_bank,
            start_bank,
            mode: 0xFF,
            arm_cycles: 0,
            bus_overdrive_address: NO_OVERDRIVE,
            sty_zero_page_address: 0,
            jmp_operand_address: 0,
            fast_jump_active: 0,
            bank_locked: false,
            bank_changed: false,
            ram_random: config.ram_random,
            rng_state: 0xDEAD_BEEF,
            timing: config.timing,
        };
        cart.set_initial_state();
        cart
    }

    /// Attach an ARM interpreter.
    pub fn with_coprocessor(mut self, mut coprocessor: Box<dyn Coprocessor>) -> Self {
        coprocessor.set_console_timing(self.timing);
        self.coprocessor = Some(coprocessor);
        self
    }

    pub fn console_timing(&self) -> ConsoleTiming {
        self.timing
    }

    fn set_initial_state(&mut self) {
        self.ram.load_driver(&self.image);
        self.music.waveform_size = [super::audio::DEFAULT_WAVEFORM_SIZE; 3];
        // Fast fetch off, 3-voice music
        self.mode = 0xFF;
    }

    #[inline]
    pub fn bus_stuff_on(&self) -> bool {
        self.mode & 0x0F == 0
    }

    #[inline]
    pub fn digital_audio_on(&self) -> bool {
        self.mode & 0xF0 == 0
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn ram(&self) -> &BusRam {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut BusRam {
        &mut self.ram
    }

    pub fn music(&self) -> &MusicState {
        &self.music
    }

    pub fn music_mut(&mut self) -> &mut MusicState {
        &mut self.music
    }

    /// Byte of the 6507 program area at `offset` within the current bank.
    /// `None` past the end of the image.
    #[inline]
    fn program_byte(&self, offset: u16) -> Option<u8> {
        let index = BANK_SIZE + ((self.current_bank as usize) << 12) + offset as usize;
        self.image.get(index).copied()
    }

    fn amplitude(&mut self, ctx: &BusContext) -> u8 {
        self.music.update(ctx.cycles32());
        if self.digital_audio_on() {
            self.music.digital_sample(&self.image, self.ram.sample())
        } else {
            self.music.three_voice(&self.ram)
        }
    }

    fn call_function(&mut self, value: u8, ctx: &mut BusContext) {
        match value {
            // ARM code "runs in zero 6507 cycles", so IRQ-driven audio
            // needs no special handling
            CALLFN_RUN_IRQ | CALLFN_RUN => {
                let now = ctx.cycles32();
                let cycles = now.wrapping_sub(self.arm_cycles) as i32;
                self.arm_cycles = now;

                if let Some(cp) = self.coprocessor.as_mut() {
                    let result = cp.run(cycles, &self.image, self.ram.as_mut_slice(), &mut self.music);
                    if let Err(fault) = result {
                        if ctx.autodetect {
                            log::debug!("ignoring ARM fault during autodetect: {}", fault);
                        } else {
                            ctx.report_fatal(fault.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Simple xorshift PRNG
    fn next_random(&mut self) -> u8 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        (self.rng_state & 0xFF) as u8
    }

    fn state(&self) -> BusState {
        BusState {
            name: NAME.to_string(),
            bank: self.current_bank,
            ram: self.ram.as_slice().to_vec(),
            bus_overdrive_address: self.bus_overdrive_address,
            sty_zero_page_address: self.sty_zero_page_address,
            jmp_operand_address: self.jmp_operand_address,
            system_cycles: self.music.system_cycles,
            fractional_clocks: self.music.encoded_fraction(),
            arm_cycles: self.arm_cycles,
            music_counters: self.music.counters,
            music_frequencies: self.music.frequencies,
            music_waveform_size: self.music.waveform_size,
            mode: self.mode,
            fast_jump_active: self.fast_jump_active,
        }
    }
}

impl Cartridge for CartBus {
    fn name(&self) -> &'static str {
        NAME
    }

    fn reset(&mut self, ctx: &mut BusContext) {
        if self.ram_random {
            for i in DRIVER_SIZE..BUS_RAM_SIZE {
                let b = self.next_random();
                self.ram.as_mut_slice()[i] = b;
            }
        } else {
            self.ram.as_mut_slice()[DRIVER_SIZE..].fill(0);
        }

        self.music.system_cycles = ctx.cycles32();
        self.arm_cycles = ctx.cycles32();
        self.music.fractional_clocks = 0.0;

        self.set_initial_state();
        self.bank(self.start_bank);
    }

    fn peek(&mut self, address: u16, ctx: &mut BusContext) -> u8 {
        let address = address & 0x0FFF;
        let mut peekvalue = self.program_byte(address).unwrap_or(0);

        // Debugger holds the bank: no hotspots, no quirk bookkeeping
        if self.bank_locked {
            return peekvalue;
        }

        // JMP FASTJUMP: operand bytes come from the jump stream
        if self.fast_jump_active > 0 && self.jmp_operand_address == address {
            self.fast_jump_active -= 1;
            self.jmp_operand_address = self.jmp_operand_address.wrapping_add(1);
            return self.ram.read_from_datastream_unit(JUMPSTREAM);
        }

        // JMP $0000 arms the substitution for the next two fetches
        if self.bus_stuff_on()
            && peekvalue == OP_JMP_ABS
            && self.program_byte(address + 1) == Some(0)
            && self.program_byte(address + 2) == Some(0)
        {
            self.fast_jump_active = 2;
            self.jmp_operand_address = address + 1;
            return peekvalue;
        }

        self.jmp_operand_address = 0;

        // This is the STY operand: remember its zero-page target
        if self.bus_stuff_on() && self.sty_zero_page_address == address {
            self.bus_overdrive_address = peekvalue as u16;
        }
        self.sty_zero_page_address = 0;

        match address {
            AMPLITUDE => peekvalue = self.amplitude(ctx),
            DSREAD => peekvalue = self.ram.read_from_datastream(COMMSTREAM),
            // DSWRITE, DSPTR, SETMODE, CALLFN are write-only
            BANK0..=BANK6 => {
                self.bank(address - BANK0);
            }
            _ => {}
        }

        // Might not work right for STY $84
        if self.bus_stuff_on() && peekvalue == OP_STY_ZP {
            self.sty_zero_page_address = address + 1;
        }

        peekvalue
    }

    fn poke(&mut self, address: u16, value: u8, ctx: &mut BusContext) -> bool {
        let address = address & 0x0FFF;
        match address {
            // AMPLITUDE and DSREAD are read-only
            DSWRITE => self.ram.write_to_datastream(COMMSTREAM, value),
            DSPTR => self.ram.shift_datastream_pointer(COMMSTREAM, value),
            SETMODE => self.mode = value,
            CALLFN => self.call_function(value, ctx),
            BANK0..=BANK6 => return self.bank(address - BANK0),
            _ => {}
        }
        false
    }

    fn bus_overdrive(&mut self, address: u16) -> u8 {
        let mut overdrive = 0xFF;

        if address == self.bus_overdrive_address {
            let map = (address & 0x7F) as u8;
            if map <= LAST_MAPPED_REG {
                overdrive = self.ram.read_mapped_datastream(map);
            }
        }

        // Single shot: the next poke is not overdriven
        self.bus_overdrive_address = NO_OVERDRIVE;
        overdrive
    }

    fn bank(&mut self, bank: u16) -> bool {
        if self.bank_locked || bank >= BANK_COUNT {
            return false;
        }
        if bank != self.current_bank {
            log::debug!("BUS bank {} -> {}", self.current_bank, bank);
        }
        self.current_bank = bank;
        self.bank_changed = true;
        true
    }

    fn current_bank(&self) -> u16 {
        self.current_bank
    }

    fn bank_count(&self) -> u16 {
        BANK_COUNT
    }

    fn patch(&mut self, address: u16, value: u8) -> bool {
        let address = address & 0x0FFF;
        if self.bank_locked || address < PATCH_MIN {
            return false;
        }
        let index = BANK_SIZE + ((self.current_bank as usize) << 12) + address as usize;
        match self.image.get_mut(index) {
            Some(b) => {
                *b = value;
                self.bank_changed = true;
                true
            }
            None => false,
        }
    }

    fn save(&self, out: &mut Vec<u8>) -> bool {
        match bincode::serialize_into(out, &self.state()) {
            Ok(()) => true,
            Err(e) => {
                log::error!("CartridgeBUS::save: {}", e);
                false
            }
        }
    }

    fn load(&mut self, input: &[u8]) -> bool {
        let state: BusState = match bincode::deserialize(input) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("CartridgeBUS::load: {}", e);
                return false;
            }
        };
        if state.name != NAME {
            log::warn!("CartridgeBUS::load: state belongs to {}", state.name);
            return false;
        }
        if state.ram.len() != BUS_RAM_SIZE || state.bank >= BANK_COUNT {
            log::warn!("CartridgeBUS::load: malformed state");
            return false;
        }

        self.current_bank = state.bank;
        self.ram.restore(&state.ram);
        self.bus_overdrive_address = state.bus_overdrive_address;
        self.sty_zero_page_address = state.sty_zero_page_address;
        self.jmp_operand_address = state.jmp_operand_address;
        self.music.system_cycles = state.system_cycles;
        self.music.set_encoded_fraction(state.fractional_clocks);
        self.arm_cycles = state.arm_cycles;
        self.music.counters = state.music_counters;
        self.music.frequencies = state.music_frequencies;
        self.music.waveform_size = state.music_waveform_size;
        self.mode = state.mode;
        self.fast_jump_active = state.fast_jump_active;

        // Re-map through the normal path
        self.bank(self.current_bank);
        true
    }

    fn image(&self) -> &[u8] {
        &self.image
    }

    fn internal_ram(&self) -> &[u8] {
        self.ram.as_slice()
    }

    fn console_timing_changed(&mut self, timing: ConsoleTiming) {
        self.timing = timing;
        if let Some(cp) = self.coprocessor.as_mut() {
            cp.set_console_timing(timing);
        }
    }

    fn system_cycles_reset(&mut self, cycles: u64) {
        self.music.cycles_reset(cycles as u32);
        self.arm_cycles = self.arm_cycles.wrapping_sub(cycles as u32);
    }

    fn lock_bank(&mut self) {
        self.bank_locked = true;
    }

    fn unlock_bank(&mut self) {
        self.bank_locked = false;
    }

    fn bank_locked(&self) -> bool {
        self.bank_locked
    }

    fn bank_changed(&mut self) -> bool {
        std::mem::take(&mut self.bank_changed)
    }
}

/// Heuristic format detection: the BUS driver contains the string "BUS"
/// at least twice.
pub fn is_probably_bus(image: &[u8]) -> bool {
    image.windows(3).filter(|w| *w == b"BUS").count() >= 2
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::cart::datastream::WAVEFORM_BASE;
    use crate::cart::ram::{DSRAM, WAVEFORM};
    use crate::cart::thumb::{CoprocessorFault, CoprocessorHost};

    /// Image whose every program byte encodes its bank in the high nibble.
    fn banked_image() -> Vec<u8> {
        let mut image = vec![0u8; BUS_IMAGE_SIZE];
        for bank in 0..7 {
            let base = BANK_SIZE + bank * BANK_SIZE;
            for i in 0..BANK_SIZE {
                image[base + i] = ((bank as u8) << 4) | (i as u8 & 0x0F);
            }
        }
        image
    }

    fn cart_with(image: &[u8]) -> (CartBus, BusContext) {
        let mut ctx = BusContext::new();
        let mut cart = CartBus::new(image, &BusConfig::default());
        cart.reset(&mut ctx);
        (cart, ctx)
    }

    fn bus_stuffing(cart: &mut CartBus, ctx: &mut BusContext) {
        cart.poke(0x1000 | SETMODE, 0xF0, ctx);
        assert!(cart.bus_stuff_on());
    }

    #[test]
    fn test_starts_in_bank_6() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        assert_eq!(cart.current_bank(), 6);
        assert_eq!(cart.peek(0x1100, &mut ctx), 0x60);
    }

    #[test]
    fn test_bank_mapping() {
        let image = banked_image();
        let (mut cart, mut ctx) = cart_with(&image);
        for b in 0..7u16 {
            assert!(cart.bank(b));
            for offset in [0x000u16, 0x041, 0x7FF, 0xFED] {
                let expected = image[BANK_SIZE + b as usize * BANK_SIZE + offset as usize];
                assert_eq!(cart.peek(0x1000 | offset, &mut ctx), expected);
            }
        }
    }

    #[test]
    fn test_bank_hotspots() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        cart.peek(0x1FF5, &mut ctx);
        assert_eq!(cart.current_bank(), 0);
        assert!(cart.poke(0x1FF8, 0, &mut ctx));
        assert_eq!(cart.current_bank(), 3);
        assert!(cart.bank_changed());
        assert!(!cart.bank_changed());
        // 0xFF4 and 0xFFC are not hotspots
        assert!(!cart.poke(0x1FF4, 0, &mut ctx));
        cart.peek(0x1FFC, &mut ctx);
        assert_eq!(cart.current_bank(), 3);
    }

    #[test]
    fn test_locked_bank_does_not_change() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        cart.lock_bank();
        assert!(!cart.bank(2));
        cart.peek(0x1FF5, &mut ctx);
        assert!(!cart.poke(0x1FF6, 0, &mut ctx));
        assert_eq!(cart.current_bank(), 6);
        // Reads still come from the held bank
        assert_eq!(cart.peek(0x1003, &mut ctx), 0x63);
        cart.unlock_bank();
        assert!(cart.bank(2));
    }

    #[test]
    fn test_patch_protection() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        cart.bank_changed();
        assert!(!cart.patch(0x1010, 0xEA));
        assert!(!cart.bank_changed());
        assert!(cart.patch(0x1040, 0xEA));
        assert!(cart.bank_changed());
        assert_eq!(cart.peek(0x1040, &mut ctx), 0xEA);
        cart.lock_bank();
        assert!(!cart.patch(0x1050, 0xEA));
    }

    #[test]
    fn test_datastream_hotspots() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        // Point COMMSTREAM at display offset 0x102
        cart.poke(0x1000 | DSPTR, 0x01, &mut ctx);
        cart.poke(0x1000 | DSPTR, 0x02, &mut ctx);
        cart.poke(0x1000 | DSWRITE, 0xAA, &mut ctx);
        cart.poke(0x1000 | DSWRITE, 0xBB, &mut ctx);
        assert_eq!(cart.ram().as_slice()[DSRAM + 0x102], 0xAA);
        assert_eq!(cart.ram().as_slice()[DSRAM + 0x103], 0xBB);

        cart.poke(0x1000 | DSPTR, 0x01, &mut ctx);
        cart.poke(0x1000 | DSPTR, 0x02, &mut ctx);
        cart.ram_mut().set_datastream_increment(COMMSTREAM, 0x100);
        assert_eq!(cart.peek(0x1000 | DSREAD, &mut ctx), 0xAA);
        assert_eq!(cart.peek(0x1000 | DSREAD, &mut ctx), 0xBB);
    }

    #[test]
    fn test_fast_jump() {
        let mut image = banked_image();
        let base = BANK_SIZE + 6 * BANK_SIZE;
        image[base + 0x200] = 0x4C;
        image[base + 0x201] = 0x00;
        image[base + 0x202] = 0x00;
        image[base + 0x203] = 0xEA;
        let (mut cart, mut ctx) = cart_with(&image);
        bus_stuffing(&mut cart, &mut ctx);

        cart.ram_mut().as_mut_slice()[DSRAM + 0x40] = 0x34;
        cart.ram_mut().as_mut_slice()[DSRAM + 0x41] = 0x12;
        cart.ram_mut().set_datastream_pointer(JUMPSTREAM, 0x40 << 20);

        assert_eq!(cart.peek(0x1200, &mut ctx), 0x4C);
        assert_eq!(cart.peek(0x1201, &mut ctx), 0x34);
        assert_eq!(cart.peek(0x1202, &mut ctx), 0x12);
        assert_eq!(cart.peek(0x1203, &mut ctx), 0xEA);
        assert_eq!(cart.ram().datastream_pointer(JUMPSTREAM), 0x42 << 20);
    }

    #[test]
    fn test_fast_jump_needs_bus_stuffing() {
        let mut image = banked_image();
        let base = BANK_SIZE + 6 * BANK_SIZE;
        image[base + 0x200] = 0x4C;
        image[base + 0x201] = 0x00;
        image[base + 0x202] = 0x00;
        let (mut cart, mut ctx) = cart_with(&image);
        assert!(!cart.bus_stuff_on());
        cart.peek(0x1200, &mut ctx);
        assert_eq!(cart.peek(0x1201, &mut ctx), 0x00);
    }

    #[test]
    fn test_sty_overdrive() {
        let mut image = banked_image();
        let base = BANK_SIZE + 6 * BANK_SIZE;
        // STY GRP0
        image[base + 0x300] = 0x84;
        image[base + 0x301] = 0x1B;
        let (mut cart, mut ctx) = cart_with(&image);
        bus_stuffing(&mut cart, &mut ctx);

        cart.ram_mut().as_mut_slice()[DSRAM + 0x10] = 0x3C;
        cart.ram_mut().as_mut_slice()[DSRAM + 0x20] = 0x5A;
        cart.ram_mut().set_datastream_pointer(1, 0x10 << 20);
        cart.ram_mut().set_datastream_pointer(2, 0x20 << 20);
        cart.ram_mut().set_address_map(0x1B, 0x0000_0021);

        assert_eq!(cart.peek(0x1300, &mut ctx), 0x84);
        assert_eq!(cart.peek(0x1301, &mut ctx), 0x1B);
        assert_eq!(cart.bus_overdrive(0x001B), 0x3C);
        // Single shot
        assert_eq!(cart.bus_overdrive(0x001B), 0xFF);

        // Second STY uses the rotated selector
        cart.peek(0x1300, &mut ctx);
        cart.peek(0x1301, &mut ctx);
        assert_eq!(cart.bus_overdrive(0x001B), 0x5A);
    }

    #[test]
    fn test_overdrive_cleared_by_other_poke() {
        let mut image = banked_image();
        let base = BANK_SIZE + 6 * BANK_SIZE;
        image[base + 0x300] = 0x84;
        image[base + 0x301] = 0x06;
        let (mut cart, mut ctx) = cart_with(&image);
        bus_stuffing(&mut cart, &mut ctx);
        cart.peek(0x1300, &mut ctx);
        cart.peek(0x1301, &mut ctx);
        assert_eq!(cart.bus_overdrive(0x0007), 0xFF);
        assert_eq!(cart.bus_overdrive(0x0006), 0xFF);
    }

    #[test]
    fn test_overdrive_ignores_unmapped_registers() {
        let mut image = banked_image();
        let base = BANK_SIZE + 6 * BANK_SIZE;
        image[base + 0x300] = 0x84;
        image[base + 0x301] = 0x2A; // HMOVE
        let (mut cart, mut ctx) = cart_with(&image);
        bus_stuffing(&mut cart, &mut ctx);
        cart.peek(0x1300, &mut ctx);
        cart.peek(0x1301, &mut ctx);
        assert_eq!(cart.bus_overdrive(0x002A), 0xFF);
    }

    #[test]
    fn test_digital_amplitude() {
        let mut image = banked_image();
        image[0x0F00] = 0xC3;
        let (mut cart, mut ctx) = cart_with(&image);
        // High nibble clear: digital audio
        cart.poke(0x1000 | SETMODE, 0x0F, &mut ctx);
        cart.ram_mut().set_word(WAVEFORM, 0x0F00);

        cart.music_mut().counters[0] = 0;
        assert_eq!(cart.peek(0x1FEE, &mut ctx), 0x0C);
        cart.music_mut().counters[0] = 1 << 20;
        assert_eq!(cart.peek(0x1FEE, &mut ctx), 0x03);
    }

    #[test]
    fn test_three_voice_amplitude() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        for x in 0..3u32 {
            cart.ram_mut().set_word(WAVEFORM + x as usize * 4, WAVEFORM_BASE + 0x100);
        }
        cart.ram_mut().as_mut_slice()[DSRAM + 0x100] = 0x05;
        assert_eq!(cart.peek(0x1FEE, &mut ctx), 0x0F);
    }

    #[test]
    fn test_amplitude_advances_counters() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        cart.music_mut().set_note(0, 3);
        ctx.cycles += 1_193_192;
        cart.peek(0x1FEE, &mut ctx);
        assert_eq!(cart.music().counters[0], 60000);
    }

    struct Scripted {
        fail: bool,
        runs: Vec<i32>,
    }

    impl Coprocessor for Scripted {
        fn run(&mut self, cycles: i32, _rom: &[u8], ram: &mut [u8], host: &mut dyn CoprocessorHost)
            -> Result<(), CoprocessorFault>
        {
            self.runs.push(cycles);
            if self.fail {
                return Err(CoprocessorFault::new("bad opcode", 0x812));
            }
            ram[DSRAM] = 0x99;
            host.set_note(2, 1234);
            Ok(())
        }
    }

    #[test]
    fn test_callfn_runs_coprocessor() {
        let mut ctx = BusContext::new();
        let mut cart = CartBus::new(&banked_image(), &BusConfig::default())
            .with_coprocessor(Box::new(Scripted { fail: false, runs: Vec::new() }));
        cart.reset(&mut ctx);
        ctx.cycles = 500;
        cart.poke(0x1000 | CALLFN, CALLFN_RUN, &mut ctx);
        assert_eq!(cart.music().frequencies[2], 1234);
        assert_eq!(cart.ram().as_slice()[DSRAM], 0x99);
        // Other selectors do nothing
        cart.music_mut().frequencies[2] = 0;
        cart.poke(0x1000 | CALLFN, 0x10, &mut ctx);
        assert_eq!(cart.music().frequencies[2], 0);
    }

    #[test]
    fn test_callfn_fault_reporting() {
        let mut ctx = BusContext::new();
        let mut cart = CartBus::new(&banked_image(), &BusConfig::default())
            .with_coprocessor(Box::new(Scripted { fail: true, runs: Vec::new() }));
        cart.reset(&mut ctx);

        ctx.autodetect = true;
        cart.poke(0x1000 | CALLFN, CALLFN_RUN_IRQ, &mut ctx);
        assert!(!ctx.has_fatal());

        ctx.autodetect = false;
        cart.poke(0x1000 | CALLFN, CALLFN_RUN, &mut ctx);
        let msg = ctx.take_fatal().unwrap();
        assert!(msg.contains("bad opcode"));
    }

    struct TimingWatch(Rc<Cell<Option<ConsoleTiming>>>);

    impl Coprocessor for TimingWatch {
        fn run(&mut self, _cycles: i32, _rom: &[u8], _ram: &mut [u8], _host: &mut dyn CoprocessorHost)
            -> Result<(), CoprocessorFault>
        {
            Ok(())
        }

        fn set_console_timing(&mut self, timing: ConsoleTiming) {
            self.0.set(Some(timing));
        }
    }

    #[test]
    fn test_timing_reaches_coprocessor() {
        let seen = Rc::new(Cell::new(None));
        let config = BusConfig { timing: ConsoleTiming::Pal, ..BusConfig::default() };
        let mut cart = CartBus::new(&banked_image(), &config)
            .with_coprocessor(Box::new(TimingWatch(Rc::clone(&seen))));
        assert_eq!(seen.get(), Some(ConsoleTiming::Pal));
        assert_eq!(cart.console_timing(), ConsoleTiming::Pal);

        cart.console_timing_changed(ConsoleTiming::Secam);
        assert_eq!(seen.get(), Some(ConsoleTiming::Secam));
        assert_eq!(cart.console_timing(), ConsoleTiming::Secam);
    }

    #[test]
    fn test_reset_with_random_ram() {
        let mut image = banked_image();
        image[0x10] = 0x42;
        let config = BusConfig { ram_random: true, ..BusConfig::default() };
        let mut ctx = BusContext::new();
        let mut cart = CartBus::new(&image, &config);
        cart.reset(&mut ctx);

        let ram = cart.ram().as_slice();
        assert_eq!(&ram[..DRIVER_SIZE], &image[..DRIVER_SIZE]);
        assert!(ram[DSRAM..].iter().any(|&b| b != 0));

        // A second reset draws fresh bytes
        let first = ram[DSRAM..].to_vec();
        cart.reset(&mut ctx);
        assert_ne!(&cart.ram().as_slice()[DSRAM..], &first[..]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (mut cart, mut ctx) = cart_with(&banked_image());
        cart.bank(2);
        cart.poke(0x1000 | SETMODE, 0x30, &mut ctx);
        cart.music_mut().counters = [1, 2, 3];
        cart.music_mut().fractional_clocks = 0.5;
        cart.ram_mut().as_mut_slice()[0x1234] = 0x77;

        let mut buf = Vec::new();
        assert!(cart.save(&mut buf));

        let (mut other, _) = cart_with(&banked_image());
        assert!(other.load(&buf));
        assert_eq!(other.current_bank(), 2);
        assert_eq!(other.mode(), 0x30);
        assert_eq!(other.music(), cart.music());
        assert_eq!(other.ram().as_slice(), cart.ram().as_slice());
        assert!(other.bank_changed());
    }

    #[test]
    fn test_load_rejects_other_name() {
        let (cart, _) = cart_with(&banked_image());
        let mut state = cart.state();
        state.name = "Cartridge4K".to_string();
        state.bank = 1;
        let buf = bincode::serialize(&state).unwrap();

        let (mut other, _) = cart_with(&banked_image());
        assert!(!other.load(&buf));
        assert_eq!(other.current_bank(), 6);
        assert!(!other.load(&buf[..10]));
    }

    #[test]
    fn test_reset_copies_driver() {
        let mut image = banked_image();
        image[0x10] = 0x42;
        let (mut cart, mut ctx) = cart_with(&image);
        cart.ram_mut().as_mut_slice()[0x10] = 0;
        cart.ram_mut().as_mut_slice()[DSRAM + 5] = 0xFF;
        cart.bank(1);
        cart.reset(&mut ctx);
        assert_eq!(cart.ram().as_slice()[0x10], 0x42);
        assert_eq!(cart.ram().as_slice()[DSRAM + 5], 0);
        assert_eq!(cart.current_bank(), 6);
        assert_eq!(cart.mode(), 0xFF);
    }

    #[test]
    fn test_detect() {
        let mut image = vec![0u8; BUS_IMAGE_SIZE];
        assert!(!is_probably_bus(&image));
        image[0x100..0x103].copy_from_slice(b"BUS");
        assert!(!is_probably_bus(&image));
        image[0x400..0x403].copy_from_slice(b"BUS");
        assert!(is_probably_bus(&image));
    }
}
