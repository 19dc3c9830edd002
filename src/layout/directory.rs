//! In-segment key directory
//!
//! A flat, fixed-capacity, open-addressed table of `#[repr(C)]` entries with
//! linear probing and tombstones. Key and tag bytes live in the arena; the
//! table itself stores only offsets, lengths and the item's kind byte, so the
//! same bytes mean the same thing in every process regardless of mapping base.

use std::mem::size_of;

use super::arena::{Arena, ArenaError};
use super::constants::NIL;
use super::header::SegmentHeader;

/// Slot states
pub const SLOT_EMPTY: u8 = 0;
pub const SLOT_OCCUPIED: u8 = 1;
pub const SLOT_TOMBSTONE: u8 = 2;

/// One directory slot: key → {kind, tag} plus the value geometry
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    /// Slot state (empty / occupied / tombstone)
    pub state: u8,
    /// Item kind discriminant
    pub kind: u8,
    _pad: [u8; 6],
    /// FNV-1a hash of the key bytes
    pub key_hash: u64,
    /// Key bytes in the arena
    pub key_off: u64,
    pub key_len: u64,
    /// Tag bytes in the arena; NIL offset for the empty tag
    pub tag_off: u64,
    pub tag_len: u64,
    pub tag_cap: u64,
    /// Value payload in the arena; NIL offset for payload-free kinds
    pub val_off: u64,
    pub val_len: u64,
    pub val_cap: u64,
}

impl DirEntry {
    /// A fully vacant entry, the starting point for building a new one
    pub fn empty() -> Self {
        DirEntry {
            state: SLOT_EMPTY,
            kind: 0,
            _pad: [0; 6],
            key_hash: 0,
            key_off: NIL,
            key_len: 0,
            tag_off: NIL,
            tag_len: 0,
            tag_cap: 0,
            val_off: NIL,
            val_len: 0,
            val_cap: 0,
        }
    }

    fn vacate(&mut self) {
        *self = Self::empty();
    }
}

/// Deterministic key hash. The std hasher is seeded per process, which would
/// scatter the same key to different slots in different processes; FNV-1a is
/// stable everywhere.
pub fn hash_key(key: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// View over a segment's directory table.
///
/// Every operation requires the segment lock to be held by the caller.
#[derive(Clone, Copy)]
pub struct Directory {
    base: *mut u8,
    header: *mut SegmentHeader,
}

impl Directory {
    /// Attach to the directory of a mapped segment.
    ///
    /// # Safety
    /// `base` must point at a mapping holding a bootstrapped segment,
    /// outliving this view.
    pub unsafe fn attach(base: *mut u8) -> Self {
        Self {
            base,
            header: base as *mut SegmentHeader,
        }
    }

    /// Number of slots in the table
    pub fn slots(&self) -> u64 {
        unsafe { (*self.header).directory_slots }
    }

    /// Number of live items
    pub fn len(&self) -> u64 {
        unsafe { (*self.header).item_count }
    }

    /// Whether the directory holds no items
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw pointer to a slot's entry
    ///
    /// # Safety
    /// `slot` must be below [`slots`](Self::slots), and the segment lock must
    /// be held for the lifetime of any reference derived from the pointer.
    pub unsafe fn entry_ptr(&self, slot: u64) -> *mut DirEntry {
        let offset = (*self.header).directory_offset as usize + slot as usize * size_of::<DirEntry>();
        self.base.add(offset) as *mut DirEntry
    }

    /// Find the slot holding `key`, if any
    pub fn find(&self, key: &str, arena: &Arena) -> Option<u64> {
        let slots = self.slots();
        let hash = hash_key(key);
        let mut probe = hash % slots;

        for _ in 0..slots {
            let entry = unsafe { &*self.entry_ptr(probe) };
            match entry.state {
                SLOT_EMPTY => return None,
                SLOT_OCCUPIED if entry.key_hash == hash => {
                    // A key whose bytes cannot be read is treated as absent;
                    // the engine reports corruption conservatively
                    if let Ok(stored) = arena.bytes(entry.key_off, entry.key_len as usize) {
                        if stored == key.as_bytes() {
                            return Some(probe);
                        }
                    }
                }
                _ => {}
            }
            probe = (probe + 1) % slots;
        }
        None
    }

    /// Find the slot a new entry for `key` should occupy. Returns `None`
    /// when the table is full.
    pub fn probe_vacant(&self, key: &str) -> Option<u64> {
        let slots = self.slots();
        let hash = hash_key(key);
        let mut probe = hash % slots;

        for _ in 0..slots {
            let entry = unsafe { &*self.entry_ptr(probe) };
            if entry.state != SLOT_OCCUPIED {
                return Some(probe);
            }
            probe = (probe + 1) % slots;
        }
        None
    }

    /// Occupy `slot` with a fresh entry. The caller has already placed key,
    /// tag and value bytes in the arena.
    pub fn occupy(&self, slot: u64, entry: DirEntry) {
        unsafe {
            let target = self.entry_ptr(slot);
            std::ptr::write(target, DirEntry { state: SLOT_OCCUPIED, ..entry });
            (*self.header).item_count += 1;
        }
    }

    /// Check that `slot`'s key and tag allocations can be released
    pub fn validate_vacate(&self, slot: u64, arena: &Arena) -> Result<(), ArenaError> {
        let entry = unsafe { &*self.entry_ptr(slot) };
        arena.validate_payload(entry.key_off)?;
        if entry.tag_off != NIL {
            arena.validate_payload(entry.tag_off)?;
        }
        Ok(())
    }

    /// Release `slot`'s key and tag allocations and tombstone the slot.
    /// The value allocation is the engine's to release before calling this.
    pub fn vacate(&self, slot: u64, arena: &Arena) -> Result<(), ArenaError> {
        self.validate_vacate(slot, arena)?;
        unsafe {
            let entry = &mut *self.entry_ptr(slot);
            arena.free(entry.key_off)?;
            if entry.tag_off != NIL {
                arena.free(entry.tag_off)?;
            }
            entry.vacate();
            entry.state = SLOT_TOMBSTONE;
            (*self.header).item_count -= 1;
        }
        Ok(())
    }

    /// Slots currently holding live entries
    pub fn occupied_slots(&self) -> Vec<u64> {
        let slots = self.slots();
        let mut live = Vec::new();
        for slot in 0..slots {
            let entry = unsafe { &*self.entry_ptr(slot) };
            if entry.state == SLOT_OCCUPIED {
                live.push(slot);
            }
        }
        live
    }

    /// Reset every slot to empty and zero the item count. The caller has
    /// already released all arena allocations the entries referenced.
    pub fn reset(&self) {
        let slots = self.slots();
        for slot in 0..slots {
            unsafe { (*self.entry_ptr(slot)).vacate() };
        }
        unsafe { (*self.header).item_count = 0 };
    }
}

unsafe impl Send for Directory {}
