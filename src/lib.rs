//! Card-table remembered sets for chunked generational heaps.
//!
//! Every old chunk carries a byte-per-card [card table](heap::card_table) and a
//! [first object table](heap::first_object_table). Mutators dirty cards through
//! the [write barrier](heap::write_barrier); a minor collection walks only the
//! dirty cards of old chunks through
//! [`RememberedSet::walk_dirty_objects`](heap::remembered_set::RememberedSet::walk_dirty_objects)
//! instead of scanning the whole old generation.

pub mod base;
pub mod error;
pub mod heap;
pub mod memory;

pub use base::constants::BYTES_PER_CARD;
pub use base::utils::formatted_size;
pub use error::{RemsetError, Result};
pub use heap::chunk::{AlignedChunk, ChunkId, Space};
pub use heap::heap::Heap;
pub use heap::options::HeapOptions;
pub use heap::remembered_set::{ObjectVisitor, RememberedSet, RememberedSetState, WalkStats};
pub use heap::verifier::Verifier;
