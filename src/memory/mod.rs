pub mod chunk_memory;
pub mod object_header;
