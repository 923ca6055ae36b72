//! Host address decoding.
//!
//! The 6507 exposes 13 address lines. With A12 clear the access lands in
//! the TIA/RIOT mirrors; with A12 set the cartridge sees the low 12 bits.
//!
//! | A12 | A9 | A7 | Target    |
//! |-----|----|----|-----------|
//! | 0   | x  | 1  | RIOT      |
//! | 0   | 0  | 0  | TIA       |
//! | 0   | 1  | 0  | open bus  |
//! | 1   | x  | x  | cartridge |

/// Destination of a host bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// RIOT (6532) RAM, I/O and timer mirror
    Riot,
    /// TIA register mirror
    Tia,
    /// Nothing drives the bus here
    Open,
    /// Cartridge window; carries the 12-bit offset
    Cart(u16),
}

/// Route a host address to its target. Pure function of the address bits.
#[inline]
pub fn decode(addr: u16) -> Target {
    if addr & 0x1000 != 0 {
        return Target::Cart(addr & 0x0FFF);
    }
    let low = addr & 0x03FF;
    if low & 0x0080 != 0 {
        Target::Riot
    } else if low & 0x0200 == 0 {
        Target::Tia
    } else {
        Target::Open
    }
}

/// True if the access targets peripheral space (A12 clear).
#[inline]
pub fn is_peripheral(addr: u16) -> bool {
    addr & 0x1000 == 0
}
