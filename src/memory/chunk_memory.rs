//! Byte-level access to a chunk's memory.
//!
//! This is the only place that dereferences raw chunk memory. Everything
//! above it addresses the chunk by offsets from its base.

use std::sync::atomic::AtomicU8;

use atomic::Ordering;

use crate::base::virtual_memory::VirtualMemory;
use crate::error::Result;

pub struct ChunkMemory {
    mem: VirtualMemory,
}

impl ChunkMemory {
    /// Maps a block of `size` bytes aligned to `size`.
    pub fn new(size: usize) -> Result<Self> {
        Ok(Self {
            mem: VirtualMemory::allocate_aligned(size, size, "heap chunk")?,
        })
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.mem.start()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.mem.size()
    }

    #[inline]
    pub fn contains(&self, address: usize) -> bool {
        self.mem.contains(address)
    }

    #[inline]
    pub fn offset_of(&self, address: usize) -> usize {
        debug_assert!(
            self.contains(address),
            "{:#x} is outside of chunk {:#x}",
            address,
            self.base()
        );
        address - self.base()
    }

    #[inline]
    pub fn address_at(&self, offset: usize) -> usize {
        debug_assert!(offset <= self.size());
        self.base() + offset
    }

    #[inline(always)]
    fn check(&self, offset: usize, len: usize) {
        debug_assert!(
            offset.checked_add(len).map_or(false, |end| end <= self.size()),
            "access of {} bytes at offset {:#x} is out of bounds for chunk of {:#x} bytes",
            len,
            offset,
            self.size()
        );
    }

    #[inline(always)]
    fn atomic_byte(&self, offset: usize) -> &AtomicU8 {
        self.check(offset, 1);
        // SAFETY: offset is in bounds and `AtomicU8` has the layout of `u8`.
        unsafe { &*self.mem.address().add(offset).cast::<AtomicU8>() }
    }

    /// Relaxed byte load. Safe to race with [`ChunkMemory::store_u8`].
    #[inline(always)]
    pub fn load_u8(&self, offset: usize) -> u8 {
        self.atomic_byte(offset).load(Ordering::Relaxed)
    }

    /// Relaxed byte store through a shared reference. Used for the card table,
    /// which is written concurrently by mutators and the scanning GC worker.
    #[inline(always)]
    pub fn store_u8(&self, offset: usize, value: u8) {
        self.atomic_byte(offset).store(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn read_i8(&self, offset: usize) -> i8 {
        self.check(offset, 1);
        unsafe { self.mem.address().add(offset).cast::<i8>().read() }
    }

    #[inline]
    pub fn write_i8(&mut self, offset: usize, value: i8) {
        self.check(offset, 1);
        unsafe { self.mem.address().add(offset).cast::<i8>().write(value) }
    }

    #[inline]
    pub fn read_u64(&self, offset: usize) -> u64 {
        self.check(offset, 8);
        unsafe { self.mem.address().add(offset).cast::<u64>().read_unaligned() }
    }

    #[inline]
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.check(offset, 8);
        unsafe {
            self.mem
                .address()
                .add(offset)
                .cast::<u64>()
                .write_unaligned(value)
        }
    }

    pub fn fill(&mut self, offset: usize, len: usize, value: u8) {
        self.check(offset, len);
        unsafe { std::ptr::write_bytes(self.mem.address().add(offset), value, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{constants::MIN_CHUNK_SIZE, is_aligned};

    #[test]
    fn test_chunk_memory_access() {
        let mut mem = ChunkMemory::new(MIN_CHUNK_SIZE).unwrap();
        assert!(is_aligned(mem.base(), MIN_CHUNK_SIZE));

        mem.fill(128, 64, 0xAB);
        assert_eq!(mem.load_u8(128), 0xAB);
        assert_eq!(mem.load_u8(191), 0xAB);
        assert_eq!(mem.load_u8(192), 0);

        mem.store_u8(128, 0);
        assert_eq!(mem.load_u8(128), 0);

        mem.write_i8(300, -5);
        assert_eq!(mem.read_i8(300), -5);

        // unaligned word access
        mem.write_u64(1001, 0xdead_beef_cafe_babe);
        assert_eq!(mem.read_u64(1001), 0xdead_beef_cafe_babe);

        let addr = mem.address_at(1001);
        assert_eq!(mem.offset_of(addr), 1001);
        assert!(mem.contains(addr));
    }
}
