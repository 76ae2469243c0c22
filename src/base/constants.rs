use std::mem::size_of;

pub const KB: usize = 1024;
pub const MB: usize = KB * 1024;

/// Size of the header word every object in a chunk starts with.
pub const HEADER_SIZE: usize = size_of::<u64>();
/// Size of a single reference slot. References are stored as full 64-bit addresses.
pub const REFERENCE_SIZE: usize = size_of::<u64>();

/// Objects start at, and are sized in multiples of, this many bytes.
pub const ALLOCATION_GRANULARITY: usize = 4;
pub const MIN_OBJECT_SIZE: usize = HEADER_SIZE;

pub const LOG_BYTES_PER_CARD: usize = 9;
pub const BYTES_PER_CARD: usize = 1 << LOG_BYTES_PER_CARD;
pub const GRANULES_PER_CARD: usize = BYTES_PER_CARD / ALLOCATION_GRANULARITY;

pub const MIN_CHUNK_SIZE: usize = 64 * KB;
/// Object sizes are stored in 32 header bits, so no object may reach 4 GiB.
pub const MAX_CHUNK_SIZE: usize = 1024 * MB;
pub const DEFAULT_CHUNK_SIZE: usize = MB;

/// Alignment of the start of each table and of the object region inside a chunk.
pub const CHUNK_REGION_ALIGNMENT: usize = 64;

// A first-object-table entry is a signed byte. A direct offset must be able to
// reach back across one whole card.
const _: () = assert!(GRANULES_PER_CARD <= 128);
const _: () = assert!(BYTES_PER_CARD.is_power_of_two());
const _: () = assert!(MIN_CHUNK_SIZE.is_power_of_two());
const _: () = assert!(MAX_CHUNK_SIZE.is_power_of_two());
