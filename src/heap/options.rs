use core::fmt;

use crate::base::constants::DEFAULT_CHUNK_SIZE;
use crate::base::utils::{formatted_size, read_bool_from_env, read_uint_from_env};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct HeapOptions {
    /// Size and alignment of every chunk. Must be a power of two.
    pub chunk_size: usize,
    /// Workers used by [`Heap::walk_dirty_objects_parallel`](super::heap::Heap::walk_dirty_objects_parallel).
    pub parallel_gc_threads: usize,
    /// Number of chunks a worker claims at once during a parallel walk.
    pub parallel_chunk_stride: usize,
    /// Run the verifier after promoting a chunk.
    pub verify_remembered_set: bool,
}

impl Default for HeapOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            parallel_gc_threads: num_cpus::get().max(1),
            parallel_chunk_stride: 4,
            verify_remembered_set: cfg!(debug_assertions),
        }
    }
}

impl HeapOptions {
    /// Defaults overridden by `REMSET_CHUNK_SIZE`, `REMSET_GC_THREADS`,
    /// `REMSET_CHUNK_STRIDE` and `REMSET_VERIFY`.
    pub fn from_env() -> Self {
        let mut opts = Self::default();

        if let Some(chunk_size) = read_uint_from_env("REMSET_CHUNK_SIZE") {
            opts.chunk_size = chunk_size;
        }

        if let Some(threads) = read_uint_from_env("REMSET_GC_THREADS") {
            opts.parallel_gc_threads = threads.max(1);
        }

        if let Some(stride) = read_uint_from_env("REMSET_CHUNK_STRIDE") {
            opts.parallel_chunk_stride = stride.max(1);
        }

        if let Some(verify) = read_bool_from_env("REMSET_VERIFY") {
            opts.verify_remembered_set = verify;
        }

        opts
    }
}

impl fmt::Display for HeapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapOptions")
            .field("chunk_size", &formatted_size(self.chunk_size))
            .field("parallel_gc_threads", &self.parallel_gc_threads)
            .field("parallel_chunk_stride", &self.parallel_chunk_stride)
            .field("verify_remembered_set", &self.verify_remembered_set)
            .finish()
    }
}
