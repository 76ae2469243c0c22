pub mod card_table;
pub mod chunk;
pub mod first_object_table;
pub mod heap;
pub mod layout;
pub mod options;
pub mod remembered_set;
pub mod verifier;
pub mod write_barrier;
