//! Fixed layout of an aligned chunk.
//!
//! ```text
//! base                                                             base + chunk_size
//! | header | card table | first object table | objects ............ |
//!          ^ card_table_start                  ^ objects_start      ^ objects_limit
//! ```
//!
//! Everything here is a pure function of the chunk size and folds to constants
//! for a fixed configuration.

use std::mem::size_of;

use crate::base::align_up;
use crate::base::constants::{
    CHUNK_REGION_ALIGNMENT, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE,
};
use crate::error::{RemsetError, Result};

use super::card_table::CardTable;
use super::first_object_table::FirstObjectTable;

/// In-memory chunk header: magic word followed by the space tag.
pub const CHUNK_HEADER_SIZE: usize = 2 * size_of::<u64>();
pub const CHUNK_MAGIC_OFFSET: usize = 0;
pub const CHUNK_SPACE_OFFSET: usize = size_of::<u64>();

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ChunkLayout {
    chunk_size: usize,
}

impl ChunkLayout {
    pub const DEFAULT: Self = Self::new_unchecked(DEFAULT_CHUNK_SIZE);

    pub fn new(chunk_size: usize) -> Result<Self> {
        if !chunk_size.is_power_of_two()
            || chunk_size < MIN_CHUNK_SIZE
            || chunk_size > MAX_CHUNK_SIZE
        {
            return Err(RemsetError::InvalidLayout { chunk_size });
        }

        Ok(Self::new_unchecked(chunk_size))
    }

    pub const fn new_unchecked(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    #[inline]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Mask that recovers a chunk base from any address inside the chunk.
    #[inline]
    pub const fn chunk_mask(&self) -> usize {
        !(self.chunk_size - 1)
    }

    #[inline]
    pub const fn chunk_base_of(&self, address: usize) -> usize {
        address & self.chunk_mask()
    }

    pub const fn struct_size(&self) -> usize {
        align_up(CHUNK_HEADER_SIZE, CHUNK_REGION_ALIGNMENT)
    }

    pub const fn card_table_start(&self) -> usize {
        self.struct_size()
    }

    /// Bytes reserved for the card table. Sized for the whole chunk past the
    /// header, which over-approximates the object region.
    pub const fn card_table_size(&self) -> usize {
        align_up(
            CardTable::table_size_for_memory_size(self.chunk_size - self.struct_size()),
            CHUNK_REGION_ALIGNMENT,
        )
    }

    pub const fn first_object_table_start(&self) -> usize {
        self.card_table_start() + self.card_table_size()
    }

    pub const fn first_object_table_size(&self) -> usize {
        align_up(
            FirstObjectTable::table_size_for_memory_size(self.chunk_size - self.struct_size()),
            CHUNK_REGION_ALIGNMENT,
        )
    }

    pub const fn objects_start(&self) -> usize {
        align_up(
            self.first_object_table_start() + self.first_object_table_size(),
            CHUNK_REGION_ALIGNMENT,
        )
    }

    pub const fn objects_limit(&self) -> usize {
        self.chunk_size
    }

    pub const fn object_capacity(&self) -> usize {
        self.objects_limit() - self.objects_start()
    }

    /// Number of cards covering the object region, i.e. live entries in each table.
    pub const fn card_entries(&self) -> usize {
        CardTable::table_size_for_memory_size(self.object_capacity())
    }
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}
