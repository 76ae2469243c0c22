//! Byte-per-card table over a chunk's object region.
//!
//! Dirty is the all-zero byte, so the barrier fast path is a single
//! unconditional store of zero. Concurrent mutators only ever write Dirty,
//! which makes racing stores to the same card harmless.

use crate::base::constants::{BYTES_PER_CARD, LOG_BYTES_PER_CARD};
use crate::error::{RemsetError, Result};
use crate::memory::chunk_memory::ChunkMemory;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct CardTable {
    table_start: usize,
    entries: usize,
}

impl CardTable {
    pub const DIRTY_ENTRY: u8 = 0;
    pub const CLEAN_ENTRY: u8 = 1;

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

    /// Marks every card clean.
    pub fn clean(&self, mem: &mut ChunkMemory) {
        mem.fill(self.table_start, self.entries, Self::CLEAN_ENTRY);
    }

    #[inline(always)]
    pub fn set_dirty(&self, mem: &ChunkMemory, index: usize) {
        debug_assert!(index < self.entries, "card {} out of {}", index, self.entries);
        mem.store_u8(self.table_start + index, Self::DIRTY_ENTRY);
    }

    #[inline(always)]
    pub fn set_clean(&self, mem: &ChunkMemory, index: usize) {
        debug_assert!(index < self.entries, "card {} out of {}", index, self.entries);
        mem.store_u8(self.table_start + index, Self::CLEAN_ENTRY);
    }

    #[inline(always)]
    pub fn is_dirty(&self, mem: &ChunkMemory, index: usize) -> bool {
        debug_assert!(index < self.entries, "card {} out of {}", index, self.entries);
        mem.load_u8(self.table_start + index) == Self::DIRTY_ENTRY
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.entries {
            Ok(())
        } else {
            Err(RemsetError::CardIndexOutOfRange {
                index,
                entries: self.entries,
            })
        }
    }

    pub fn is_dirty_checked(&self, mem: &ChunkMemory, index: usize) -> Result<bool> {
        self.check_index(index)?;
        Ok(self.is_dirty(mem, index))
    }

    pub fn set_dirty_checked(&self, mem: &ChunkMemory, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.set_dirty(mem, index);
        Ok(())
    }

    pub fn set_clean_checked(&self, mem: &ChunkMemory, index: usize) -> Result<()> {
        self.check_index(index)?;
        self.set_clean(mem, index);
        Ok(())
    }

    pub fn count_dirty(&self, mem: &ChunkMemory) -> usize {
        (0..self.entries)
            .filter(|&index| self.is_dirty(mem, index))
            .count()
    }

    /// Card covering `offset` bytes into the object region. A card covers
    /// `[index * BYTES_PER_CARD, (index + 1) * BYTES_PER_CARD)`.
    #[inline(always)]
    pub const fn memory_offset_to_index(offset: usize) -> usize {
        offset >> LOG_BYTES_PER_CARD
    }

    #[inline(always)]
    pub const fn index_to_memory_offset(index: usize) -> usize {
        index << LOG_BYTES_PER_CARD
    }

    #[inline(always)]
    pub const fn index_to_memory_pointer(base: usize, index: usize) -> usize {
        base + Self::index_to_memory_offset(index)
    }

    /// Entries needed to cover `mem_size` bytes; a trailing partial card gets its own entry.
    pub const fn table_size_for_memory_size(mem_size: usize) -> usize {
        (mem_size + BYTES_PER_CARD - 1) / BYTES_PER_CARD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::constants::MIN_CHUNK_SIZE;

    fn table() -> (ChunkMemory, CardTable) {
        let mut mem = ChunkMemory::new(MIN_CHUNK_SIZE).unwrap();
        let table = CardTable::new(64, 100);
        table.clean(&mut mem);
        (mem, table)
    }

    #[test]
    fn test_indexing_math() {
        assert_eq!(CardTable::memory_offset_to_index(0), 0);
        assert_eq!(CardTable::memory_offset_to_index(511), 0);
        assert_eq!(CardTable::memory_offset_to_index(512), 1);
        assert_eq!(CardTable::memory_offset_to_index(1600), 3);
        assert_eq!(CardTable::index_to_memory_offset(3), 1536);
        assert_eq!(CardTable::index_to_memory_pointer(0x1000, 2), 0x1400);

        assert_eq!(CardTable::table_size_for_memory_size(0), 0);
        assert_eq!(CardTable::table_size_for_memory_size(1), 1);
        assert_eq!(CardTable::table_size_for_memory_size(512), 1);
        assert_eq!(CardTable::table_size_for_memory_size(513), 2);
    }

    #[test]
    fn test_dirty_is_zero() {
        assert_eq!(CardTable::DIRTY_ENTRY, 0);
        assert_ne!(CardTable::CLEAN_ENTRY, CardTable::DIRTY_ENTRY);
    }

    #[test]
    fn test_clean_and_dirty() {
        let (mem, table) = table();
        assert_eq!(table.count_dirty(&mem), 0);

        table.set_dirty(&mem, 5);
        table.set_dirty(&mem, 5);
        table.set_dirty(&mem, 99);
        assert!(table.is_dirty(&mem, 5));
        assert!(table.is_dirty(&mem, 99));
        assert!(!table.is_dirty(&mem, 6));
        assert_eq!(table.count_dirty(&mem), 2);

        table.set_clean(&mem, 5);
        assert!(!table.is_dirty(&mem, 5));
        assert_eq!(table.count_dirty(&mem), 1);

        // the byte right after the table is not part of it
        assert_eq!(mem.load_u8(64 + 100), 0);
    }

    #[test]
    fn test_clean_resets_everything() {
        let (mut mem, table) = table();
        for index in 0..table.entries() {
            table.set_dirty(&mem, index);
        }
        assert_eq!(table.count_dirty(&mem), 100);

        table.clean(&mut mem);
        assert_eq!(table.count_dirty(&mem), 0);
    }

    #[test]
    fn test_checked_variants() {
        let (mem, table) = table();
        assert_eq!(table.is_dirty_checked(&mem, 3), Ok(false));
        assert!(table.set_dirty_checked(&mem, 3).is_ok());
        assert_eq!(table.is_dirty_checked(&mem, 3), Ok(true));
        assert!(table.set_clean_checked(&mem, 3).is_ok());
        assert_eq!(
            table.is_dirty_checked(&mem, 100),
            Err(RemsetError::CardIndexOutOfRange {
                index: 100,
                entries: 100
            })
        );
        assert!(table.set_dirty_checked(&mem, 1000).is_err());
    }

    #[test]
    fn test_concurrent_dirtying() {
        let (mem, table) = table();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let mem = &mem;
                scope.spawn(move || {
                    for index in (t..100).step_by(2) {
                        table.set_dirty(mem, index);
                    }
                });
            }
        });

        assert_eq!(table.count_dirty(&mem), 100);
    }
}
