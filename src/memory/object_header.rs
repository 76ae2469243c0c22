//! Minimal object layout used by chunks.
//!
//! ```text
//! +-------------------- header (u64) ---------------------+------------------+
//! | size: 32 | slots: 16 | remembered: 1 | filler: 1 | .. | slot 0 | slot 1 ..
//! +-------------------------------------------------------+------------------+
//! ```
//!
//! Reference slots are 64-bit absolute addresses, `0` meaning null. Filler
//! objects pad gaps so the object region can always be walked header by header.

use std::fmt;

use crate::base::constants::{
    ALLOCATION_GRANULARITY, HEADER_SIZE, MAX_CHUNK_SIZE, REFERENCE_SIZE,
};
use crate::base::align_up;

use super::chunk_memory::ChunkMemory;

pub const SIZE_BITS: u64 = 32;
pub const SIZE_MASK: u64 = (1 << SIZE_BITS) - 1;
pub const SLOTS_SHIFT: u64 = 32;
pub const SLOTS_BITS: u64 = 16;
pub const SLOTS_MASK: u64 = (1 << SLOTS_BITS) - 1;
pub const REMEMBERED_SET_BIT: u64 = 1 << 48;
pub const FILLER_BIT: u64 = 1 << 49;

pub const MAX_REFERENCE_SLOTS: usize = SLOTS_MASK as usize;

const _: () = assert!(MAX_CHUNK_SIZE as u64 <= SIZE_MASK + 1);

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader(u64);

impl ObjectHeader {
    /// Header of a regular object. `size` must already be granularity aligned.
    pub const fn new(size: usize, slots: usize) -> Self {
        debug_assert!(size as u64 <= SIZE_MASK, "object size does not fit the header");
        Self((size as u64 & SIZE_MASK) | ((slots as u64 & SLOTS_MASK) << SLOTS_SHIFT))
    }

    pub const fn filler(size: usize) -> Self {
        debug_assert!(size as u64 <= SIZE_MASK, "filler size does not fit the header");
        Self((size as u64 & SIZE_MASK) | FILLER_BIT)
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn size(self) -> usize {
        (self.0 & SIZE_MASK) as usize
    }

    pub const fn reference_slots(self) -> usize {
        ((self.0 >> SLOTS_SHIFT) & SLOTS_MASK) as usize
    }

    pub const fn is_filler(self) -> bool {
        self.0 & FILLER_BIT != 0
    }

    /// Fast pre-check consulted by the write barrier before it touches the card table.
    pub const fn has_remembered_set(self) -> bool {
        self.0 & REMEMBERED_SET_BIT != 0
    }

    pub const fn with_remembered_set(self) -> Self {
        Self(self.0 | REMEMBERED_SET_BIT)
    }

    pub const fn without_remembered_set(self) -> Self {
        Self(self.0 & !REMEMBERED_SET_BIT)
    }

    /// Smallest allocation able to hold a header followed by `slots` references.
    pub const fn required_size(slots: usize) -> usize {
        HEADER_SIZE + slots * REFERENCE_SIZE
    }

    pub const fn aligned_size(size: usize) -> usize {
        align_up(size, ALLOCATION_GRANULARITY)
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeader")
            .field("size", &self.size())
            .field("slots", &self.reference_slots())
            .field("remembered", &self.has_remembered_set())
            .field("filler", &self.is_filler())
            .finish()
    }
}

#[inline]
pub fn read_header(mem: &ChunkMemory, obj: usize) -> ObjectHeader {
    ObjectHeader::from_raw(mem.read_u64(mem.offset_of(obj)))
}

#[inline]
pub fn write_header(mem: &mut ChunkMemory, obj: usize, header: ObjectHeader) {
    let offset = mem.offset_of(obj);
    mem.write_u64(offset, header.raw())
}

#[inline]
pub fn size_of(mem: &ChunkMemory, obj: usize) -> usize {
    read_header(mem, obj).size()
}

/// Address one past the last byte of `obj`.
#[inline]
pub fn end_of(mem: &ChunkMemory, obj: usize) -> usize {
    obj + size_of(mem, obj)
}

#[inline]
pub const fn slot_address(obj: usize, slot: usize) -> usize {
    obj + HEADER_SIZE + slot * REFERENCE_SIZE
}

pub fn read_reference(mem: &ChunkMemory, obj: usize, slot: usize) -> usize {
    debug_assert!(slot < read_header(mem, obj).reference_slots());
    mem.read_u64(mem.offset_of(slot_address(obj, slot))) as usize
}

pub fn write_reference(mem: &mut ChunkMemory, obj: usize, slot: usize, value: usize) {
    debug_assert!(slot < read_header(mem, obj).reference_slots());
    let offset = mem.offset_of(slot_address(obj, slot));
    mem.write_u64(offset, value as u64)
}

/// Calls `f(slot_address, target)` for every non-null reference held by `obj`.
pub fn for_each_reference(mem: &ChunkMemory, obj: usize, mut f: impl FnMut(usize, usize)) {
    let header = read_header(mem, obj);
    if header.is_filler() {
        return;
    }

    for slot in 0..header.reference_slots() {
        let slot_addr = slot_address(obj, slot);
        let target = mem.read_u64(mem.offset_of(slot_addr)) as usize;
        if target != 0 {
            f(slot_addr, target);
        }
    }
}
