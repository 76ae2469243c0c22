//! First-object table.
//!
//! Card dirtying happens at byte-store granularity, but scanning has to start
//! at an object boundary. For every card whose first byte lies inside an
//! object, this table records how to get back to that object's start. One
//! signed byte per card:
//!
//! - [`FirstObjectTable::UNINITIALIZED_ENTRY`]: no object covers the card start.
//! - `MEMORY_OFFSET_MIN..=0`: the object starts `-entry` granules before the card start.
//! - `LOG_MIN..=LOG_MAX`: go back `2^(entry - 1)` cards and look there.
//!
//! Back-pointers never jump past the card holding the object's start, so a
//! chain of them always ends in a memory offset for the same object. Each hop
//! at least halves the remaining distance, so resolving a card inside an
//! object that spans `n` cards takes `O(log n)` reads.

use crate::base::constants::{ALLOCATION_GRANULARITY, BYTES_PER_CARD, GRANULES_PER_CARD};
use crate::base::is_aligned;
use crate::memory::chunk_memory::ChunkMemory;
use crate::memory::object_header::{end_of, size_of};

use super::card_table::CardTable;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FirstObjectTable {
    table_start: usize,
    entries: usize,
}

impl FirstObjectTable {
    pub const UNINITIALIZED_ENTRY: i8 = i8::MAX;
    pub const MEMORY_OFFSET_MIN: i8 = -(GRANULES_PER_CARD as i16) as i8;
    pub const MEMORY_OFFSET_MAX: i8 = 0;
    pub const LOG_MIN: i8 = 1;
    pub const LOG_MAX: i8 = 62;

    /// `table_start` is an offset from the chunk base.
    pub const fn new(table_start: usize, entries: usize) -> Self {
        Self {
            table_start,
            entries,
        }
    }

    pub const fn table_start(&self) -> usize {
        self.table_start
    }

    pub const fn entries(&self) -> usize {
        self.entries
    }

    pub const fn table_size_for_memory_size(mem_size: usize) -> usize {
        CardTable::table_size_for_memory_size(mem_size)
    }

    pub fn initialize_table(&self, mem: &mut ChunkMemory) {
        mem.fill(
            self.table_start,
            self.entries,
            Self::UNINITIALIZED_ENTRY as u8,
        );
    }

    #[inline]
    pub fn entry(&self, mem: &ChunkMemory, index: usize) -> i8 {
        debug_assert!(index < self.entries, "card {} out of {}", index, self.entries);
        mem.read_i8(self.table_start + index)
    }

    #[inline]
    fn set_entry(&self, mem: &mut ChunkMemory, index: usize, entry: i8) {
        debug_assert!(index < self.entries, "card {} out of {}", index, self.entries);
        mem.write_i8(self.table_start + index, entry);
    }

    const fn is_memory_offset(entry: i8) -> bool {
        entry >= Self::MEMORY_OFFSET_MIN && entry <= Self::MEMORY_OFFSET_MAX
    }

    const fn is_back_pointer(entry: i8) -> bool {
        entry >= Self::LOG_MIN && entry <= Self::LOG_MAX
    }

    /// Largest `e` such that `2^(e - 1) <= cards`.
    fn back_pointer_for(cards: usize) -> i8 {
        debug_assert!(cards >= 1);
        let exponent = (usize::BITS - 1 - cards.leading_zeros()) as i8 + 1;
        debug_assert!(exponent <= Self::LOG_MAX);
        exponent
    }

    /// Records an object occupying `[start_offset, end_offset)` of the object
    /// region. Every card whose first byte lies inside the object is claimed by
    /// it. Must be called in increasing address order; a later object always
    /// overwrites whatever an earlier one left behind.
    pub fn set_table_for_object(&self, mem: &mut ChunkMemory, start_offset: usize, end_offset: usize) {
        debug_assert!(start_offset < end_offset);
        debug_assert!(is_aligned(start_offset, ALLOCATION_GRANULARITY));

        let start_index = CardTable::memory_offset_to_index(start_offset);
        // The card holding the start only belongs to us when we begin exactly on its boundary.
        let first_index = if CardTable::index_to_memory_offset(start_index) == start_offset {
            start_index
        } else {
            start_index + 1
        };
        let end_index = CardTable::table_size_for_memory_size(end_offset);

        for index in first_index..end_index {
            let distance = CardTable::index_to_memory_offset(index) - start_offset;

            let entry = if distance <= BYTES_PER_CARD {
                -((distance / ALLOCATION_GRANULARITY) as isize) as i8
            } else {
                Self::back_pointer_for(index - first_index)
            };

            self.set_entry(mem, index, entry);
        }
    }

    /// Resolves card `index` to the start of the object covering the card's
    /// first byte. The result may start on an earlier card; callers walk
    /// forward from it object by object.
    ///
    /// `objects_start` and `top` are absolute addresses bounding the live
    /// object region. Returns `None` when the card lies at or beyond `top` or no
    /// object was recorded for it.
    pub fn get_first_object_imprecise(
        &self,
        mem: &ChunkMemory,
        objects_start: usize,
        top: usize,
        index: usize,
    ) -> Option<usize> {
        if CardTable::index_to_memory_pointer(objects_start, index) >= top {
            return None;
        }

        let mut current = index;
        loop {
            let entry = self.entry(mem, current);

            if Self::is_memory_offset(entry) {
                let card_start = CardTable::index_to_memory_pointer(objects_start, current);
                let back = (-(entry as isize)) as usize * ALLOCATION_GRANULARITY;
                if back > card_start - objects_start {
                    log::error!(target: "gc-remset", "card {} resolves to {:#x} before the object region", index, card_start - back);
                    debug_assert!(false, "first object table points before the object region");
                    return None;
                }
                return Some(card_start - back);
            } else if Self::is_back_pointer(entry) {
                let jump = 1usize << (entry - 1);
                if jump > current {
                    log::error!(target: "gc-remset", "card {}: back-pointer {} at card {} leaves the table", index, entry, current);
                    debug_assert!(false, "first object table chain leaves the table");
                    return None;
                }
                current -= jump;
            } else {
                if entry != Self::UNINITIALIZED_ENTRY || current != index {
                    log::error!(target: "gc-remset", "card {}: invalid entry {} at card {}", index, entry, current);
                    debug_assert!(false, "broken first object table chain");
                }
                return None;
            }
        }
    }

    /// Walks every object in `[objects_start, top)` and checks that each card it
    /// covers resolves to an object at or before it whose forward walk lands
    /// exactly on it. Reports the first mismatch and never repairs anything.
    pub fn verify(&self, mem: &ChunkMemory, objects_start: usize, top: usize) -> bool {
        let mut obj = objects_start;

        while obj < top {
            let end = end_of(mem, obj);
            if end == obj {
                log::error!(target: "gc-remset", "zero sized object at {:#x}", obj);
                return false;
            }

            let start_offset = obj - objects_start;
            let end_offset = end - objects_start;
            let mut index = CardTable::table_size_for_memory_size(start_offset);

            while CardTable::index_to_memory_offset(index) < end_offset {
                let Some(resolved) = self.get_first_object_imprecise(mem, objects_start, top, index) else {
                    log::error!(target: "gc-remset", "card {} covered by {:#x} has no first object", index, obj);
                    return false;
                };

                let mut cursor = resolved;
                while cursor < obj {
                    let size = size_of(mem, cursor);
                    if size == 0 {
                        log::error!(target: "gc-remset", "zero sized object at {:#x}", cursor);
                        return false;
                    }
                    cursor += size;
                }

                if resolved > obj || cursor != obj {
                    log::error!(target: "gc-remset",
                        "card {} resolves to {:#x}, walk from it reaches {:#x} instead of object {:#x}",
                        index, resolved, cursor, obj
                    );
                    return false;
                }
                index += 1;
            }

            obj = end;
        }

        true
    }
}
