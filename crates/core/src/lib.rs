//! # buscart-core
//!
//! BUS bank-switching cartridge emulation for the Atari 2600, with the
//! debugger control layer that drives it (step/trace, breakpoints, rewind,
//! save states).
//!
//! The BUS scheme (Harmony/Melody boards) pairs a 32 KB ROM with 8 KB of
//! RAM and an ARM coprocessor. The 6507 sees seven 4 KB banks through the
//! cartridge window and talks to the ARM side through hotspots: datastream
//! fetchers, a three-voice music engine, and "bus stuffing" tricks that
//! substitute JMP operands and overdrive TIA writes.
//!
//! ## Architecture
//!
//! - [`decoder`] — Host address decoding (TIA / RIOT / cartridge / open bus)
//! - [`cart`] — [`Cartridge`] trait and the BUS implementation [`CartBus`]
//! - [`system`] — Host bus owning the cartridge, TIA, RIOT and cycle counter
//! - [`console`] — Whole machine: external CPU/video [`Engine`] + [`System`]
//! - [`debugger`] — Step engine, breakpoints, traps, functions, RAM viewer
//! - [`snapshot`] — Rewind ring of machine snapshots
//! - [`savestate`] — Snapshot records and compressed save-state files
//! - [`config`] — [`BusConfig`] runtime settings
//!
//! The 6507 core, TIA rendering, RIOT and the ARM interpreter are external;
//! they plug in through [`Engine`], [`VideoChip`], [`Peripheral`] and
//! [`cart::thumb::Coprocessor`].
//!
//! ## Logging
//!
//! Diagnostics go through the `log` facade. The library installs no logger.

pub mod cart;
pub mod config;
pub mod console;
pub mod debugger;
pub mod decoder;
pub mod savestate;
pub mod snapshot;
pub mod system;

#[cfg(test)]
mod testutil;

pub use cart::{is_probably_bus, BusContext, CartBus, Cartridge};
pub use config::{BusConfig, ConsoleTiming};
pub use console::{Advance, Console, Engine};
pub use debugger::{Debugger, Machine};
pub use savestate::SaveStateError;
pub use snapshot::RewindManager;
pub use system::{Peripheral, System, VideoChip};

/// BUS ROM image size: 32 KB
pub const BUS_IMAGE_SIZE: usize = 32 * 1024;
/// Harmony RAM size: 8 KB
pub const BUS_RAM_SIZE: usize = 8 * 1024;
/// 6507 bank window size: 4 KB
pub const BANK_SIZE: usize = 4 * 1024;
/// Bank selected on reset
pub const START_BANK: u16 = 6;
/// Default number of rewind levels
pub const REWIND_CAPACITY: usize = 100;

// Console input registers used by the built-in debugger functions
/// RIOT port A: joystick directions
pub const SWCHA: u16 = 0x0280;
/// RIOT port B: console switches
pub const SWCHB: u16 = 0x0282;
/// TIA input 4: left fire button
pub const INPT4: u16 = 0x000C;
/// TIA input 5: right fire button
pub const INPT5: u16 = 0x000D;
