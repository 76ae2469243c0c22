//! Generational post-write barrier.
//!
//! # Usage
//!
//! The barrier runs right after a reference is stored into an object:
//! ```ignore
//! chunk.write_reference(holder, slot, value);
//! heap.write_barrier(holder);
//! ```
//! [`Heap::store_reference`] does both.
//!
//! # Implementation
//!
//! The holder's header carries a remembered-set bit. Objects without it live in
//! young chunks, which are scanned in full, so the barrier stops there. For
//! everything else the card covering the holder's start is dirtied with a
//! single byte store. No locks, no allocation.

use crate::memory::object_header::read_header;

use super::chunk::AlignedChunk;
use super::heap::Heap;
use super::remembered_set::RememberedSet;

#[inline(always)]
pub fn write_barrier(chunk: &AlignedChunk, holder: usize) {
    if read_header(chunk.memory(), holder).has_remembered_set() {
        RememberedSet::dirty_card_for_object(chunk, holder, false);
    }
}

/// Checks that a store into `holder` is already covered by a dirty card.
/// Used to validate code that elides barriers.
pub fn verify_write_barrier(chunk: &AlignedChunk, holder: usize) -> bool {
    !read_header(chunk.memory(), holder).has_remembered_set()
        || RememberedSet::dirty_card_for_object(chunk, holder, true)
}

impl Heap {
    #[inline]
    pub fn write_barrier(&self, holder: usize) {
        match self.chunk_for(holder) {
            Some(chunk) => write_barrier(chunk, holder),
            None => debug_assert!(false, "write barrier on {:#x} outside of the heap", holder),
        }
    }

    /// Barrier variant that skips stores which cannot create an old to young edge.
    #[inline]
    pub fn post_write_barrier(&self, holder: usize, value: usize) {
        if value != 0 && self.is_young(value) {
            self.write_barrier(holder);
        }
    }

    pub fn verify_write_barrier(&self, holder: usize) -> bool {
        self.chunk_for(holder)
            .map_or(false, |chunk| verify_write_barrier(chunk, holder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::constants::MIN_CHUNK_SIZE;
    use crate::heap::chunk::{ChunkId, Space};
    use crate::heap::layout::ChunkLayout;

    #[test]
    fn test_barrier_skips_young_holders() {
        let layout = ChunkLayout::new(MIN_CHUNK_SIZE).unwrap();
        let mut chunk = AlignedChunk::new(ChunkId(0), layout, Space::Young).unwrap();
        let holder = chunk.allocate(16, 1).unwrap();

        write_barrier(&chunk, holder);
        assert_eq!(chunk.remembered_set().card_table().count_dirty(chunk.memory()), 0);
        assert!(verify_write_barrier(&chunk, holder));
    }

    #[test]
    fn test_barrier_dirties_old_holders() {
        let layout = ChunkLayout::new(MIN_CHUNK_SIZE).unwrap();
        let mut chunk = AlignedChunk::new(ChunkId(0), layout, Space::Old).unwrap();
        RememberedSet::enable_remembered_set(&mut chunk, |_| false);
        let holder = chunk.allocate(16, 1).unwrap();

        assert!(!verify_write_barrier(&chunk, holder));
        write_barrier(&chunk, holder);
        assert!(verify_write_barrier(&chunk, holder));
        assert_eq!(chunk.remembered_set().card_table().count_dirty(chunk.memory()), 1);
    }

    #[test]
    fn test_concurrent_barriers() {
        let layout = ChunkLayout::new(MIN_CHUNK_SIZE).unwrap();
        let mut chunk = AlignedChunk::new(ChunkId(0), layout, Space::Old).unwrap();
        RememberedSet::enable_remembered_set(&mut chunk, |_| false);

        let mut holders = vec![];
        while let Some(obj) = chunk.allocate(200, 2) {
            holders.push(obj);
        }

        std::thread::scope(|scope| {
            for t in 0..4 {
                let chunk = &chunk;
                let holders = &holders;
                scope.spawn(move || {
                    for holder in holders.iter().skip(t).step_by(4) {
                        write_barrier(chunk, *holder);
                    }
                });
            }
        });

        for holder in &holders {
            assert!(verify_write_barrier(&chunk, *holder));
        }
    }
}
