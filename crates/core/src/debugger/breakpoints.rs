//! One bit per 16-bit address, for breakpoints and read/write traps.
//!
//! The 8 KB backing store is only allocated the first time a bit is set or
//! toggled, so an unused set costs nothing and reports as uninitialized.

const BITS: usize = 0x10000;
const WORDS: usize = BITS / 64;

/// Dense lazily allocated bitset over the 16-bit address space.
#[derive(Debug, Clone, Default)]
pub struct PackedBitArray {
    words: Option<Box<[u64]>>,
}

impl PackedBitArray {
    pub fn new() -> Self {
        PackedBitArray { words: None }
    }

    /// Allocate (zeroed) if not yet allocated.
    pub fn initialize(&mut self) {
        if self.words.is_none() {
            self.words = Some(vec![0u64; WORDS].into_boxed_slice());
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.words.is_some()
    }

    #[inline]
    fn split(bit: u16) -> (usize, u64) {
        ((bit as usize) >> 6, 1u64 << (bit & 63))
    }

    pub fn is_set(&self, bit: u16) -> bool {
        let (word, mask) = Self::split(bit);
        match &self.words {
            Some(w) => w[word] & mask != 0,
            None => false,
        }
    }

    pub fn set(&mut self, bit: u16) {
        self.initialize();
        let (word, mask) = Self::split(bit);
        if let Some(w) = self.words.as_mut() {
            w[word] |= mask;
        }
    }

    pub fn clear(&mut self, bit: u16) {
        let (word, mask) = Self::split(bit);
        if let Some(w) = self.words.as_mut() {
            w[word] &= !mask;
        }
    }

    pub fn toggle(&mut self, bit: u16) {
        self.initialize();
        let (word, mask) = Self::split(bit);
        if let Some(w) = self.words.as_mut() {
            w[word] ^= mask;
        }
    }

    /// Clear every bit; keeps the allocation.
    pub fn clear_all(&mut self) {
        if let Some(w) = self.words.as_mut() {
            w.fill(0);
        }
    }

    /// Addresses currently set, ascending.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.words.iter().flat_map(|w| {
            w.iter().enumerate().flat_map(|(i, &word)| {
                (0..64u16).filter(move |b| word & (1u64 << b) != 0).map(move |b| ((i as u16) << 6) | b)
            })
        })
    }
}
