use std::fmt;

use crate::base::constants::{ALLOCATION_GRANULARITY, MIN_OBJECT_SIZE};
use crate::base::is_aligned;
use crate::error::Result;
use crate::memory::chunk_memory::ChunkMemory;
use crate::memory::object_header::{
    self, read_header, write_header, ObjectHeader, MAX_REFERENCE_SLOTS,
};

use super::layout::{ChunkLayout, CHUNK_MAGIC_OFFSET, CHUNK_SPACE_OFFSET};
use super::remembered_set::{RememberedSet, RememberedSetState};

pub const CHUNK_MAGIC: u64 = 0x6368_756e_6b5f_7273;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ChunkId(pub usize);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Space {
    Young = 1,
    Old = 2,
}

/// A chunk-size aligned block of memory holding its own card table, first
/// object table and a bump-allocated object region.
///
/// The object region is always walkable: every byte in `[objects_start, top)`
/// belongs to exactly one object or filler.
pub struct AlignedChunk {
    id: ChunkId,
    layout: ChunkLayout,
    memory: ChunkMemory,
    space: Space,
    top: usize,
    remembered_set: RememberedSet,
}

impl AlignedChunk {
    pub fn new(id: ChunkId, layout: ChunkLayout, space: Space) -> Result<Self> {
        let mut memory = ChunkMemory::new(layout.chunk_size())?;
        memory.write_u64(CHUNK_MAGIC_OFFSET, CHUNK_MAGIC);

        let mut this = Self {
            id,
            layout,
            top: memory.address_at(layout.objects_start()),
            memory,
            space,
            remembered_set: RememberedSet::new(&layout),
        };
        this.write_space();
        RememberedSet::clean_tables(&mut this);

        Ok(this)
    }

    fn write_space(&mut self) {
        self.memory.fill(CHUNK_SPACE_OFFSET, 1, self.space as u8);
    }

    pub fn id(&self) -> ChunkId {
        self.id
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn is_young(&self) -> bool {
        self.space == Space::Young
    }

    pub(crate) fn set_space(&mut self, space: Space) {
        self.space = space;
        self.write_space();
    }

    pub fn base(&self) -> usize {
        self.memory.base()
    }

    pub fn objects_start(&self) -> usize {
        self.memory.address_at(self.layout.objects_start())
    }

    pub fn objects_limit(&self) -> usize {
        self.memory.address_at(self.layout.objects_limit())
    }

    /// End of the allocated part of the object region.
    pub fn top(&self) -> usize {
        self.top
    }

    pub fn used(&self) -> usize {
        self.top - self.objects_start()
    }

    pub fn available(&self) -> usize {
        self.objects_limit() - self.top
    }

    pub fn contains(&self, address: usize) -> bool {
        self.memory.contains(address)
    }

    pub fn contains_object(&self, address: usize) -> bool {
        address >= self.objects_start() && address < self.top
    }

    pub fn has_valid_magic(&self) -> bool {
        self.memory.read_u64(CHUNK_MAGIC_OFFSET) == CHUNK_MAGIC
    }

    pub fn memory(&self) -> &ChunkMemory {
        &self.memory
    }

    pub(crate) fn memory_mut(&mut self) -> &mut ChunkMemory {
        &mut self.memory
    }

    pub fn remembered_set(&self) -> &RememberedSet {
        &self.remembered_set
    }

    pub(crate) fn remembered_set_mut(&mut self) -> &mut RememberedSet {
        &mut self.remembered_set
    }

    pub fn header(&self, obj: usize) -> ObjectHeader {
        debug_assert!(self.contains_object(obj));
        read_header(&self.memory, obj)
    }

    /// Bump-allocates an object of at least `size` bytes with `slots` null
    /// reference slots. Returns `None` if the request cannot hold its slots or
    /// the chunk is full.
    ///
    /// In a chunk with an enabled remembered set the object is recorded in the
    /// first object table right away.
    pub fn allocate(&mut self, size: usize, slots: usize) -> Option<usize> {
        if slots > MAX_REFERENCE_SLOTS || size < ObjectHeader::required_size(slots) {
            return None;
        }

        let size = ObjectHeader::aligned_size(size.max(MIN_OBJECT_SIZE));
        let obj = self.bump(size)?;

        write_header(&mut self.memory, obj, ObjectHeader::new(size, slots));
        for slot in 0..slots {
            object_header::write_reference(&mut self.memory, obj, slot, 0);
        }

        self.record_object(obj);
        Some(obj)
    }

    /// Pads the object region with a filler object so the next allocation
    /// starts at `address`. Gaps too small to hold a header cannot be filled.
    pub fn fill_to(&mut self, address: usize) -> Option<()> {
        if address == self.top {
            return Some(());
        }
        if address < self.top || !is_aligned(address, ALLOCATION_GRANULARITY) {
            return None;
        }

        let size = address - self.top;
        if size < MIN_OBJECT_SIZE {
            return None;
        }

        let filler = self.bump(size)?;
        write_header(&mut self.memory, filler, ObjectHeader::filler(size));
        self.record_object(filler);

        Some(())
    }

    fn bump(&mut self, size: usize) -> Option<usize> {
        if size > self.available() {
            return None;
        }

        let obj = self.top;
        self.top += size;
        Some(obj)
    }

    fn record_object(&mut self, obj: usize) {
        if self.remembered_set.state() == RememberedSetState::Enabled {
            RememberedSet::enable_remembered_set_for_object(self, obj);
        }
    }

    /// Stores a reference without a write barrier.
    pub fn write_reference(&mut self, holder: usize, slot: usize, value: usize) {
        debug_assert!(self.contains_object(holder));
        object_header::write_reference(&mut self.memory, holder, slot, value);
    }

    pub fn read_reference(&self, holder: usize, slot: usize) -> usize {
        debug_assert!(self.contains_object(holder));
        object_header::read_reference(&self.memory, holder, slot)
    }

    /// Iterates over every object in allocation order, fillers included.
    pub fn objects(&self) -> ObjectIter<'_> {
        ObjectIter {
            memory: &self.memory,
            current: self.objects_start(),
            top: self.top,
        }
    }

    /// Starts a new epoch: drops every object and disables the remembered set.
    pub fn recycle(&mut self, space: Space) {
        self.top = self.objects_start();
        self.set_space(space);
        self.remembered_set.set_state(RememberedSetState::Disabled);
        RememberedSet::clean_tables(self);

        log::debug!(target: "gc", "chunk {} recycled as {:?}", self.id, space);
    }
}

impl fmt::Debug for AlignedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedChunk")
            .field("id", &self.id)
            .field("base", &format_args!("{:#x}", self.base()))
            .field("space", &self.space)
            .field("used", &crate::formatted_size(self.used()))
            .field("remembered_set", &self.remembered_set.state())
            .finish()
    }
}

pub struct ObjectIter<'a> {
    memory: &'a ChunkMemory,
    current: usize,
    top: usize,
}

impl<'a> Iterator for ObjectIter<'a> {
    type Item = (usize, ObjectHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.top {
            return None;
        }

        let obj = self.current;
        let header = read_header(self.memory, obj);
        debug_assert!(header.size() != 0, "zero sized object at {:#x}", obj);
        // a corrupted header would otherwise loop forever
        self.current = if header.size() == 0 { self.top } else { obj + header.size() };

        Some((obj, header))
    }
}
