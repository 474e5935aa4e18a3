//! Identifier table: `slot` → current byte offset.
//!
//! The [`IdentifierTable`] is the only mutable address record in the pool.
//! Nodes move during compaction and structural edits; every external
//! reference goes through a [`NodeId`] and is resolved here, so references
//! survive relocation. Slots are reused LIFO after release, and each release
//! bumps the slot's generation so that an old [`NodeId`] cannot alias the
//! slot's next occupant.

use canopy_core::NodeId;

/// A single entry of the table.
#[derive(Clone, Copy, Debug)]
struct Slot {
    /// Byte offset of the node, or `None` when the slot is free.
    offset: Option<u32>,
    /// Number of times this slot has been released.
    generation: u32,
}

/// Maps node identifiers to byte offsets within the arena.
#[derive(Clone, Debug, Default)]
pub struct IdentifierTable {
    slots: Vec<Slot>,
    /// Released slots, most recently released last.
    free: Vec<u32>,
    /// Number of occupied slots.
    live: usize,
}

impl IdentifierTable {
    /// Create an empty table with room for `reserved` slots.
    pub fn with_capacity(reserved: usize) -> Self {
        Self {
            slots: Vec::with_capacity(reserved),
            free: Vec::new(),
            live: 0,
        }
    }

    /// Issue an identifier for a node at `offset`.
    ///
    /// Reuses the most recently released slot if there is one, otherwise
    /// appends a new slot.
    pub fn issue(&mut self, offset: u32) -> NodeId {
        self.live += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.offset = Some(offset);
            return NodeId::new(slot, entry.generation);
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            offset: Some(offset),
            generation: 0,
        });
        NodeId::new(slot, 0)
    }

    /// Release a slot. Returns `false` if it was already free.
    pub fn release(&mut self, slot: u32) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(entry) if entry.offset.is_some() => {
                entry.offset = None;
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(slot);
                self.live -= 1;
                true
            }
            _ => false,
        }
    }

    /// Resolve an identifier to its current offset, or `None` if stale.
    pub fn resolve(&self, id: NodeId) -> Option<u32> {
        let entry = self.slots.get(id.slot as usize)?;
        if entry.generation != id.generation {
            return None;
        }
        entry.offset
    }

    /// Current offset of an occupied slot.
    pub fn offset_of_slot(&self, slot: u32) -> Option<u32> {
        self.slots.get(slot as usize)?.offset
    }

    /// Full identifier of an occupied slot.
    pub fn id_of_slot(&self, slot: u32) -> Option<NodeId> {
        let entry = self.slots.get(slot as usize)?;
        entry.offset.map(|_| NodeId::new(slot, entry.generation))
    }

    /// Record that the node in `slot` now lives at `offset`.
    pub fn relocate(&mut self, slot: u32, offset: u32) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            debug_assert!(entry.offset.is_some(), "relocating free slot {slot}");
            entry.offset = Some(offset);
        }
    }

    /// Add `delta` to every occupied entry whose offset is at least `from`.
    pub fn rebase_from(&mut self, from: u32, delta: i64) {
        for entry in &mut self.slots {
            if let Some(offset) = entry.offset.as_mut() {
                if *offset >= from {
                    *offset = (*offset as i64 + delta) as u32;
                }
            }
        }
    }

    /// Release every slot, keeping generations so old identifiers stay stale.
    pub fn reset(&mut self) {
        for entry in &mut self.slots {
            if entry.offset.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
            }
        }
        self.free = (0..self.slots.len() as u32).rev().collect();
        self.live = 0;
    }

    /// Number of occupied slots.
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots ever issued (occupied or free).
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of released slots awaiting reuse.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
