//! Remembered-set verification for tests and debug builds.

use crate::memory::object_header::for_each_reference;

use super::chunk::AlignedChunk;
use super::remembered_set::RememberedSet;

pub struct Verifier;

impl Verifier {
    /// Re-derives which cards must be dirty from the objects in `chunk` and
    /// checks them against the tables:
    ///
    /// - every object holding a reference for which `is_young` is true must
    ///   have its card dirty;
    /// - every object must carry the remembered-set header bit;
    /// - the first object table must resolve every card to its object.
    ///
    /// Mismatches are logged. Nothing is modified. A chunk without an enabled
    /// remembered set has nothing to check and passes.
    pub fn verify(chunk: &AlignedChunk, is_young: impl Fn(usize) -> bool) -> bool {
        let remembered_set = chunk.remembered_set();
        if !remembered_set.is_enabled() {
            return true;
        }

        let memory = chunk.memory();
        let card_table = remembered_set.card_table();
        let mut ok = true;

        for (obj, header) in chunk.objects() {
            if header.is_filler() {
                continue;
            }

            if !header.has_remembered_set() {
                log::error!(target: "gc-remset", "chunk {}: object {:#x} is missing its remembered set bit", chunk.id(), obj);
                ok = false;
            }

            let index = RememberedSet::card_index_for(chunk, obj);
            for_each_reference(memory, obj, |slot, target| {
                if !is_young(target) {
                    return;
                }

                match card_table.is_dirty_checked(memory, index) {
                    Ok(true) => {}
                    Ok(false) => {
                        log::error!(target: "gc-remset",
                            "chunk {}: object {:#x} slot {:#x} references young {:#x} but card {} is clean",
                            chunk.id(), obj, slot, target, index
                        );
                        ok = false;
                    }
                    Err(err) => {
                        log::error!(target: "gc-remset", "chunk {}: object {:#x}: {}", chunk.id(), obj, err);
                        ok = false;
                    }
                }
            });
        }

        if !remembered_set
            .first_object_table()
            .verify(memory, chunk.objects_start(), chunk.top())
        {
            log::error!(target: "gc-remset", "chunk {}: first object table verification failed", chunk.id());
            ok = false;
        }

        ok
    }
}
