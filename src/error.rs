use std::fmt;

use crate::base::utils::formatted_size;

/// Errors surfaced by chunk management and the checked remembered-set operations.
///
/// Layout invariants that only a bug can break (card index out of range on the
/// barrier fast path, broken first-object chains) are `debug_assert!`ed instead.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RemsetError {
    /// The OS refused to map chunk memory.
    MapFailed { size: usize, errno: i32 },
    /// Chunk size is not a power of two or cannot hold the tables and a single card.
    InvalidLayout { chunk_size: usize },
    CardIndexOutOfRange { index: usize, entries: usize },
    /// Address does not belong to any chunk owned by the heap.
    NotInHeap { address: usize },
    InvalidState { chunk: usize, operation: &'static str },
}

impl fmt::Display for RemsetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MapFailed { size, errno } => write!(
                f,
                "failed to map {} of chunk memory (errno {})",
                formatted_size(*size),
                errno
            ),
            Self::InvalidLayout { chunk_size } => {
                write!(f, "invalid chunk size: {}", chunk_size)
            }
            Self::CardIndexOutOfRange { index, entries } => write!(
                f,
                "card index {} is out of range for a table of {} entries",
                index, entries
            ),
            Self::NotInHeap { address } => {
                write!(f, "address {:#x} is not inside any heap chunk", address)
            }
            Self::InvalidState { chunk, operation } => {
                write!(f, "chunk {} is in the wrong state to {}", chunk, operation)
            }
        }
    }
}

impl std::error::Error for RemsetError {}

pub type Result<T> = std::result::Result<T, RemsetError>;
