//! Per-chunk remembered set.
//!
//! Ties together the [`CardTable`] and [`FirstObjectTable`] of a chunk and
//! provides the three entry points used by the rest of the system:
//!
//! - [`RememberedSet::dirty_card_for_object`]: the write barrier. Lock-free and
//!   allocation-free, callable from any mutator thread.
//! - [`RememberedSet::enable_remembered_set`] and
//!   [`RememberedSet::enable_remembered_set_for_object`]: retrofit a chunk
//!   when it becomes old, and keep the tables up to date on allocation.
//! - [`RememberedSet::walk_dirty_objects`]: the minor collection scan.
//!
//! # Clean before scan
//!
//! The walk cleans a dirty card before it visits the card's objects. A store
//! racing with the scan either lands before the clean and gets scanned now, or
//! lands after it and re-dirties the card for the next cycle. Scanning first
//! and cleaning afterwards could drop that store.

use crate::memory::object_header::{for_each_reference, read_header, write_header};

use super::card_table::CardTable;
use super::chunk::AlignedChunk;
use super::first_object_table::FirstObjectTable;
use super::layout::ChunkLayout;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RememberedSetState {
    /// No tables are maintained. Young chunks live here; they are scanned in full.
    Disabled,
    /// Tables are being rebuilt from the objects already in the chunk.
    Enabling,
    /// Tables are kept current by allocation and the write barrier.
    Enabled,
}

/// Callback invoked for each object found on a dirty card.
pub trait ObjectVisitor {
    fn visit_object_inline(&mut self, obj: usize);
}

impl<F: FnMut(usize)> ObjectVisitor for F {
    fn visit_object_inline(&mut self, obj: usize) {
        self(obj)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct WalkStats {
    pub dirty_cards: usize,
    pub objects_visited: usize,
}

impl WalkStats {
    pub fn add(&mut self, other: &WalkStats) {
        self.dirty_cards += other.dirty_cards;
        self.objects_visited += other.objects_visited;
    }
}

pub struct RememberedSet {
    state: RememberedSetState,
    card_table: CardTable,
    first_object_table: FirstObjectTable,
}

impl RememberedSet {
    pub fn new(layout: &ChunkLayout) -> Self {
        Self {
            state: RememberedSetState::Disabled,
            card_table: CardTable::new(layout.card_table_start(), layout.card_entries()),
            first_object_table: FirstObjectTable::new(
                layout.first_object_table_start(),
                layout.card_entries(),
            ),
        }
    }

    pub fn state(&self) -> RememberedSetState {
        self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.state == RememberedSetState::Enabled
    }

    pub(crate) fn set_state(&mut self, state: RememberedSetState) {
        self.state = state;
    }

    pub fn card_table(&self) -> &CardTable {
        &self.card_table
    }

    pub fn first_object_table(&self) -> &FirstObjectTable {
        &self.first_object_table
    }

    /// Card covering the first byte of `obj`.
    #[inline(always)]
    pub fn card_index_for(chunk: &AlignedChunk, obj: usize) -> usize {
        CardTable::memory_offset_to_index(obj - chunk.objects_start())
    }

    /// Resets both tables to all-clean / all-uninitialized.
    pub fn clean_tables(chunk: &mut AlignedChunk) {
        let card_table = chunk.remembered_set().card_table;
        let first_object_table = chunk.remembered_set().first_object_table;

        card_table.clean(chunk.memory_mut());
        first_object_table.initialize_table(chunk.memory_mut());
    }

    /// Records `obj` in the first object table and sets its remembered-set
    /// header bit. `obj` must be the most recently recorded object of the chunk.
    pub fn enable_remembered_set_for_object(chunk: &mut AlignedChunk, obj: usize) {
        debug_assert!(chunk.contains_object(obj));

        let objects_start = chunk.objects_start();
        let first_object_table = chunk.remembered_set().first_object_table;
        let header = read_header(chunk.memory(), obj);
        let start_offset = obj - objects_start;

        first_object_table.set_table_for_object(
            chunk.memory_mut(),
            start_offset,
            start_offset + header.size(),
        );

        if !header.is_filler() {
            write_header(chunk.memory_mut(), obj, header.with_remembered_set());
        }
    }

    /// Turns on remembered-set tracking for a chunk that already holds objects.
    ///
    /// Both tables are reset, every object is recorded, and the cards of
    /// objects that already reference the young generation are dirtied so the
    /// next minor collection finds them. Returns the number of such objects.
    pub fn enable_remembered_set(chunk: &mut AlignedChunk, is_young: impl Fn(usize) -> bool) -> usize {
        chunk.remembered_set_mut().set_state(RememberedSetState::Enabling);
        Self::clean_tables(chunk);

        let card_table = chunk.remembered_set().card_table;
        let mut objects = 0;
        let mut with_young_refs = 0;

        let mut obj = chunk.objects_start();
        while obj < chunk.top() {
            let header = chunk.header(obj);
            Self::enable_remembered_set_for_object(chunk, obj);

            let mut young = false;
            for_each_reference(chunk.memory(), obj, |_, target| young |= is_young(target));
            if young {
                card_table.set_dirty(chunk.memory(), Self::card_index_for(chunk, obj));
                with_young_refs += 1;
            }

            objects += 1;
            obj += header.size();
        }

        chunk.remembered_set_mut().set_state(RememberedSetState::Enabled);

        log::debug!(target: "gc-remset",
            "enabled remembered set for chunk {}: {} objects, {} with young references, {} dirty cards",
            chunk.id(), objects, with_young_refs, card_table.count_dirty(chunk.memory())
        );

        with_young_refs
    }

    /// Write barrier entry point for a store into `obj`.
    ///
    /// With `verify_only` the card is only checked: returns whether it is
    /// already dirty and logs when it is not. Otherwise the card is dirtied
    /// and `true` is returned.
    #[inline(always)]
    pub fn dirty_card_for_object(chunk: &AlignedChunk, obj: usize, verify_only: bool) -> bool {
        let index = Self::card_index_for(chunk, obj);
        let card_table = &chunk.remembered_set().card_table;

        if verify_only {
            let dirty = card_table.is_dirty(chunk.memory(), index);
            if !dirty {
                log::error!(target: "gc-barrier", "object {:#x} was written to but card {} of chunk {} is clean", obj, index, chunk.id());
            }
            dirty
        } else {
            card_table.set_dirty(chunk.memory(), index);
            true
        }
    }

    /// Visits every object reachable from a dirty card of `chunk`, cleaning
    /// each dirty card before it is scanned.
    ///
    /// Fillers are skipped. An object spanning several dirty cards is visited
    /// once per walk.
    pub fn walk_dirty_objects<V: ObjectVisitor + ?Sized>(chunk: &AlignedChunk, visitor: &mut V) -> WalkStats {
        let mut stats = WalkStats::default();
        let remembered_set = chunk.remembered_set();
        if !remembered_set.is_enabled() {
            return stats;
        }

        let memory = chunk.memory();
        let card_table = &remembered_set.card_table;
        let first_object_table = &remembered_set.first_object_table;
        let objects_start = chunk.objects_start();
        let top = chunk.top();

        if top == objects_start {
            return stats;
        }

        // objects starting below this address were already handled by this walk
        let mut visited_end = objects_start;
        let last_index = CardTable::memory_offset_to_index(top - 1 - objects_start);

        for index in 0..=last_index {
            if !card_table.is_dirty(memory, index) {
                continue;
            }

            card_table.set_clean(memory, index);
            stats.dirty_cards += 1;

            let card_limit = CardTable::index_to_memory_pointer(objects_start, index + 1).min(top);
            if visited_end >= card_limit {
                continue;
            }

            let Some(first) = first_object_table.get_first_object_imprecise(memory, objects_start, top, index) else {
                log::error!(target: "gc-remset", "dirty card {} of chunk {} has no first object", index, chunk.id());
                continue;
            };

            let mut obj = first.max(visited_end);
            while obj < card_limit {
                let header = read_header(memory, obj);
                if header.size() == 0 {
                    debug_assert!(false, "zero sized object at {:#x}", obj);
                    obj = top;
                    break;
                }

                if !header.is_filler() {
                    visitor.visit_object_inline(obj);
                    stats.objects_visited += 1;
                }
                obj += header.size();
            }

            visited_end = obj;
        }

        log::trace!(target: "gc-remset",
            "chunk {}: {} dirty cards, {} objects visited",
            chunk.id(), stats.dirty_cards, stats.objects_visited
        );

        stats
    }
}
