use atomic::{Atomic, Ordering};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use scoped_thread_pool::Pool;

use crate::base::utils::formatted_size;
use crate::error::{RemsetError, Result};

use super::chunk::{AlignedChunk, ChunkId, Space};
use super::layout::ChunkLayout;
use super::options::HeapOptions;
use super::remembered_set::{ObjectVisitor, RememberedSet, WalkStats};
use super::verifier::Verifier;

/// Registry of the chunks making up a generational heap.
///
/// Chunks are aligned to their size, so the chunk owning an address is found by
/// masking the address and looking the base up in `chunk_map`.
pub struct Heap {
    opts: HeapOptions,
    layout: ChunkLayout,
    chunks: Vec<Option<Box<AlignedChunk>>>,
    chunk_map: FxHashMap<usize, ChunkId>,
    workers: OnceCell<Pool>,
}

impl Heap {
    pub fn new(opts: HeapOptions) -> Result<Self> {
        let layout = ChunkLayout::new(opts.chunk_size)?;

        log::info!(target: "gc", "Heap initialized with {}", opts);
        log::info!(target: "gc", "- Chunk size: {}", formatted_size(layout.chunk_size()));
        log::info!(target: "gc", "- Object capacity per chunk: {}", formatted_size(layout.object_capacity()));
        log::info!(target: "gc", "- Cards per chunk: {}", layout.card_entries());

        Ok(Self {
            opts,
            layout,
            chunks: vec![],
            chunk_map: FxHashMap::default(),
            workers: OnceCell::new(),
        })
    }

    pub fn options(&self) -> &HeapOptions {
        &self.opts
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    fn workers(&self) -> &Pool {
        self.workers
            .get_or_init(|| Pool::new(self.opts.parallel_gc_threads.max(1)))
    }

    /// Maps a new chunk. Old chunks start out with an enabled remembered set.
    pub fn allocate_chunk(&mut self, space: Space) -> Result<ChunkId> {
        let id = ChunkId(self.chunks.len());
        let mut chunk = Box::new(AlignedChunk::new(id, self.layout, space)?);
        if space == Space::Old {
            RememberedSet::enable_remembered_set(&mut chunk, |_| false);
        }

        log::debug!(target: "gc", "allocated {:?} chunk {} at {:#x}", space, id, chunk.base());

        self.chunk_map.insert(chunk.base(), id);
        self.chunks.push(Some(chunk));
        Ok(id)
    }

    /// Unmaps a chunk. Its id is never reused.
    pub fn release_chunk(&mut self, id: ChunkId) -> Result<()> {
        let chunk = self
            .chunks
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(RemsetError::InvalidState {
                chunk: id.0,
                operation: "release",
            })?;

        self.chunk_map.remove(&chunk.base());
        log::debug!(target: "gc", "released chunk {}", id);
        Ok(())
    }

    pub fn chunk(&self, id: ChunkId) -> Option<&AlignedChunk> {
        self.chunks.get(id.0).and_then(|chunk| chunk.as_deref())
    }

    pub fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut AlignedChunk> {
        self.chunks.get_mut(id.0).and_then(|chunk| chunk.as_deref_mut())
    }

    pub fn chunk_id_for(&self, address: usize) -> Option<ChunkId> {
        self.chunk_map
            .get(&self.layout.chunk_base_of(address))
            .copied()
    }

    /// Chunk containing `address`, recovered by alignment masking.
    #[inline]
    pub fn chunk_for(&self, address: usize) -> Option<&AlignedChunk> {
        let chunk = self.chunk(self.chunk_id_for(address)?)?;
        debug_assert!(chunk.has_valid_magic());
        Some(chunk)
    }

    fn chunk_for_mut(&mut self, address: usize) -> Result<&mut AlignedChunk> {
        let id = self
            .chunk_id_for(address)
            .ok_or(RemsetError::NotInHeap { address })?;
        self.chunk_mut(id).ok_or(RemsetError::NotInHeap { address })
    }

    pub fn is_young(&self, address: usize) -> bool {
        self.chunk_for(address)
            .map_or(false, |chunk| chunk.is_young())
    }

    pub fn chunks(&self) -> impl Iterator<Item = &AlignedChunk> {
        self.chunks.iter().filter_map(|chunk| chunk.as_deref())
    }

    pub fn old_chunks(&self) -> impl Iterator<Item = &AlignedChunk> {
        self.chunks().filter(|chunk| chunk.space() == Space::Old)
    }

    pub fn young_chunks(&self) -> impl Iterator<Item = &AlignedChunk> {
        self.chunks().filter(|chunk| chunk.is_young())
    }

    /// Allocates in the given chunk. See [`AlignedChunk::allocate`].
    pub fn allocate(&mut self, id: ChunkId, size: usize, slots: usize) -> Option<usize> {
        self.chunk_mut(id)?.allocate(size, slots)
    }

    pub fn read_reference(&self, holder: usize, slot: usize) -> Result<usize> {
        let chunk = self
            .chunk_for(holder)
            .ok_or(RemsetError::NotInHeap { address: holder })?;
        Ok(chunk.read_reference(holder, slot))
    }

    /// Stores `value` into `slot` of `holder` and runs the write barrier.
    pub fn store_reference(&mut self, holder: usize, slot: usize, value: usize) -> Result<()> {
        self.chunk_for_mut(holder)?
            .write_reference(holder, slot, value);
        self.write_barrier(holder);
        Ok(())
    }

    /// Moves a young chunk to the old generation and retrofits a remembered
    /// set onto it. Returns the number of objects whose cards were pre-dirtied
    /// because they still reference the young generation.
    pub fn promote_chunk(&mut self, id: ChunkId) -> Result<usize> {
        let layout = self.layout;
        let young: FxHashSet<usize> = self
            .young_chunks()
            .filter(|chunk| chunk.id() != id)
            .map(|chunk| chunk.base())
            .collect();

        let verify = self.opts.verify_remembered_set;
        let chunk = self.chunk_mut(id).ok_or(RemsetError::InvalidState {
            chunk: id.0,
            operation: "promote",
        })?;

        if !chunk.is_young() {
            return Err(RemsetError::InvalidState {
                chunk: id.0,
                operation: "promote",
            });
        }

        chunk.set_space(Space::Old);
        let is_young = |target: usize| young.contains(&layout.chunk_base_of(target));
        let dirtied = RememberedSet::enable_remembered_set(chunk, is_young);

        log::debug!(target: "gc", "promoted chunk {} ({} used, {} objects with young references)", id, formatted_size(chunk.used()), dirtied);

        if verify && !Verifier::verify(chunk, is_young) {
            log::error!(target: "gc", "remembered set verification failed after promoting chunk {}", id);
        }

        Ok(dirtied)
    }

    /// Starts a new epoch for a chunk. See [`AlignedChunk::recycle`].
    pub fn recycle_chunk(&mut self, id: ChunkId, space: Space) -> Result<()> {
        let chunk = self.chunk_mut(id).ok_or(RemsetError::InvalidState {
            chunk: id.0,
            operation: "recycle",
        })?;

        chunk.recycle(space);
        if space == Space::Old {
            RememberedSet::enable_remembered_set(chunk, |_| false);
        }
        Ok(())
    }

    /// Walks the dirty cards of every old chunk on the calling thread.
    pub fn walk_dirty_objects<V: ObjectVisitor + ?Sized>(&self, visitor: &mut V) -> WalkStats {
        let mut stats = WalkStats::default();
        for chunk in self.old_chunks() {
            stats.add(&RememberedSet::walk_dirty_objects(chunk, visitor));
        }
        stats
    }

    /// Walks the dirty cards of every old chunk on the GC worker pool.
    ///
    /// Workers claim chunks in strides of `parallel_chunk_stride`, so every
    /// chunk is scanned by exactly one worker. Each worker gets its own visitor
    /// from `make_visitor`; all visitors are returned once the walk is done.
    pub fn walk_dirty_objects_parallel<V, F>(&self, make_visitor: F) -> (Vec<V>, WalkStats)
    where
        V: ObjectVisitor + Send,
        F: Fn() -> V + Sync,
    {
        let chunks: Vec<&AlignedChunk> = self.old_chunks().collect();
        let stride = self.opts.parallel_chunk_stride.max(1);
        let nworkers = self.opts.parallel_gc_threads.max(1);

        let cursor = Atomic::new(0usize);
        let dirty_cards = Atomic::new(0usize);
        let objects_visited = Atomic::new(0usize);
        let visitors = Mutex::new(Vec::with_capacity(nworkers));

        // blocking call, waits for every worker to finish.
        self.workers().scoped(|scope| {
            for _ in 0..nworkers {
                let chunks = &chunks;
                let cursor = &cursor;
                let dirty_cards = &dirty_cards;
                let objects_visited = &objects_visited;
                let visitors = &visitors;
                let make_visitor = &make_visitor;

                scope.execute(move || {
                    let mut visitor = make_visitor();

                    loop {
                        let start = cursor.fetch_add(stride, Ordering::Relaxed);
                        if start >= chunks.len() {
                            break;
                        }

                        let end = chunks.len().min(start + stride);
                        for chunk in &chunks[start..end] {
                            let stats = RememberedSet::walk_dirty_objects(*chunk, &mut visitor);
                            dirty_cards.fetch_add(stats.dirty_cards, Ordering::Relaxed);
                            objects_visited.fetch_add(stats.objects_visited, Ordering::Relaxed);
                        }
                    }

                    visitors.lock().push(visitor);
                });
            }
        });

        let stats = WalkStats {
            dirty_cards: dirty_cards.load(Ordering::Relaxed),
            objects_visited: objects_visited.load(Ordering::Relaxed),
        };

        log::debug!(target: "gc-remset",
            "parallel walk over {} chunks with {} workers: {} dirty cards, {} objects",
            chunks.len(), nworkers, stats.dirty_cards, stats.objects_visited
        );

        (visitors.into_inner(), stats)
    }

    /// Runs the [`Verifier`] over every old chunk.
    pub fn verify_remembered_sets(&self) -> bool {
        let mut ok = true;
        for chunk in self.old_chunks() {
            ok &= Verifier::verify(chunk, |target| self.is_young(target));
        }
        ok
    }
}
