//! Rewind ring for the debugger.
//!
//! Every step-style debugger operation pushes the machine state before it
//! runs; `rewind` pops the most recent one. Slots hold opaque encoded
//! machine state plus the display buffer, and are allocated on first use
//! and reused afterwards.

use crate::debugger::Machine;

/// A frozen machine state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Encoded machine state
    pub state: Vec<u8>,
    /// Display framebuffer
    pub display: Vec<u8>,
}

impl Snapshot {
    /// Empty the buffers, keeping their allocations.
    pub fn clear(&mut self) {
        self.state.clear();
        self.display.clear();
    }
}

/// Ring buffer of snapshots. When full, the oldest entry is overwritten.
pub struct RewindManager {
    slots: Vec<Option<Snapshot>>,
    /// Capture buffer; swapped into the ring only once a capture succeeds
    scratch: Snapshot,
    /// Next slot to write
    top: usize,
    /// Number of valid snapshots
    size: usize,
}

impl RewindManager {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        for _ in 0..capacity { slots.push(None); }
        RewindManager { slots, scratch: Snapshot::default(), top: 0, size: 0 }
    }

    /// Capture `machine` into the next slot. Returns false (and leaves the
    /// ring as it was) if the machine cannot be serialized.
    pub fn add_state<M: Machine + ?Sized>(&mut self, machine: &M) -> bool {
        self.scratch.clear();
        if !machine.save_state(&mut self.scratch.state) {
            log::warn!("rewind: could not save state");
            return false;
        }
        machine.save_display(&mut self.scratch.display);

        // The displaced buffers become the next scratch
        let slot = self.slots[self.top].get_or_insert_with(Snapshot::default);
        std::mem::swap(slot, &mut self.scratch);

        self.top = (self.top + 1) % self.slots.len();
        if self.size < self.slots.len() {
            self.size += 1;
        }
        log::debug!("rewind: {} level(s) stored", self.size);
        true
    }

    /// Restore the most recent snapshot into `machine` and drop it from the
    /// ring. Returns false if the ring is empty.
    pub fn rewind_state<M: Machine + ?Sized>(&mut self, machine: &mut M) -> bool {
        if self.size == 0 { return false; }
        self.size -= 1;
        self.top = (self.top + self.slots.len() - 1) % self.slots.len();

        match &self.slots[self.top] {
            Some(snap) => {
                if machine.load_state(&snap.state) {
                    machine.load_display(&snap.display);
                } else {
                    log::warn!("rewind: could not load state");
                }
            }
            None => log::warn!("rewind: slot {} is empty", self.top),
        }
        true
    }

    /// Drop all snapshots; slot buffers are kept for reuse.
    pub fn clear(&mut self) {
        for slot in self.slots.iter_mut().flatten() { slot.clear(); }
        self.top = 0;
        self.size = 0;
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize { self.size }

    pub fn is_empty(&self) -> bool { self.size == 0 }

    pub fn capacity(&self) -> usize { self.slots.len() }

    /// Bytes currently allocated for slot buffers.
    pub fn memory_usage(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .chain(std::iter::once(&self.scratch))
            .map(|s| s.state.capacity() + s.display.capacity())
            .sum()
    }
}
