use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use remset::base::constants::{MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use remset::{ChunkId, Heap, HeapOptions, ObjectVisitor, RememberedSet, RemsetError, Space};

fn heap() -> Heap {
    let _ = env_logger::builder().is_test(true).try_init();
    Heap::new(HeapOptions {
        chunk_size: MIN_CHUNK_SIZE,
        parallel_gc_threads: 4,
        parallel_chunk_stride: 2,
        verify_remembered_set: true,
    })
    .unwrap()
}

fn is_dirty(heap: &Heap, holder: usize) -> bool {
    let chunk = heap.chunk_for(holder).unwrap();
    chunk
        .remembered_set()
        .card_table()
        .is_dirty(chunk.memory(), RememberedSet::card_index_for(chunk, holder))
}

#[test]
fn rejects_invalid_chunk_sizes() {
    let opts = HeapOptions {
        chunk_size: MIN_CHUNK_SIZE + 4096,
        ..Default::default()
    };
    assert!(matches!(Heap::new(opts), Err(RemsetError::InvalidLayout { .. })));

    let opts = HeapOptions {
        chunk_size: MAX_CHUNK_SIZE * 2,
        ..Default::default()
    };
    assert!(matches!(Heap::new(opts), Err(RemsetError::InvalidLayout { .. })));
}

#[test]
fn chunk_for_masks_interior_addresses() {
    let mut heap = heap();
    let young = heap.allocate_chunk(Space::Young).unwrap();
    let old = heap.allocate_chunk(Space::Old).unwrap();

    let obj = heap.allocate(old, 1000, 1).unwrap();
    assert_eq!(heap.chunk_for(obj).unwrap().id(), old);
    assert_eq!(heap.chunk_for(obj + 999).unwrap().id(), old);
    assert_eq!(heap.chunk_id_for(obj + 999), Some(old));

    let base = heap.chunk(young).unwrap().base();
    assert_eq!(heap.chunk_for(base + MIN_CHUNK_SIZE - 1).unwrap().id(), young);
    assert!(heap.is_young(base + 100));
    assert!(!heap.is_young(obj));

    let local = 0u64;
    assert!(heap.chunk_for(&local as *const u64 as usize).is_none());
}

#[test]
fn chunk_for_resolves_every_registered_chunk() {
    let mut heap = heap();
    let ids: Vec<ChunkId> = (0..32)
        .map(|i| {
            let space = if i % 2 == 0 { Space::Young } else { Space::Old };
            heap.allocate_chunk(space).unwrap()
        })
        .collect();

    for id in &ids {
        let chunk = heap.chunk(*id).unwrap();
        let (base, start) = (chunk.base(), chunk.objects_start());
        assert_eq!(heap.chunk_id_for(base), Some(*id));
        assert_eq!(heap.chunk_id_for(start + 4096), Some(*id));
        assert_eq!(heap.chunk_id_for(base + MIN_CHUNK_SIZE - 8), Some(*id));
    }

    let released = heap.chunk(ids[3]).unwrap().base();
    heap.release_chunk(ids[3]).unwrap();
    assert_eq!(heap.chunk_id_for(released + 100), None);
    for id in ids.iter().filter(|id| **id != ids[3]) {
        let base = heap.chunk(*id).unwrap().base();
        assert_eq!(heap.chunk_id_for(base + 100), Some(*id));
    }
}

#[test]
fn barrier_dirties_old_holders_only() {
    let mut heap = heap();
    let young = heap.allocate_chunk(Space::Young).unwrap();
    let old = heap.allocate_chunk(Space::Old).unwrap();

    let y = heap.allocate(young, 16, 1).unwrap();
    let o = heap.allocate(old, 32, 2).unwrap();

    heap.store_reference(y, 0, o).unwrap();
    assert!(heap.verify_write_barrier(y));

    assert!(!is_dirty(&heap, o));
    heap.store_reference(o, 1, y).unwrap();
    assert!(is_dirty(&heap, o));
    assert_eq!(heap.read_reference(o, 1).unwrap(), y);
    assert!(heap.verify_remembered_sets());

    let mut visited = vec![];
    let stats = heap.walk_dirty_objects(&mut |obj| visited.push(obj));
    assert_eq!(visited, vec![o]);
    assert_eq!(stats.dirty_cards, 1);
    assert_eq!(stats.objects_visited, 1);

    // the walk cleaned the card while the young reference is still there
    assert!(!heap.verify_remembered_sets());
    heap.write_barrier(o);
    assert!(heap.verify_remembered_sets());
}

#[test]
fn post_write_barrier_filters_non_young_values() {
    let mut heap = heap();
    let young = heap.allocate_chunk(Space::Young).unwrap();
    let old = heap.allocate_chunk(Space::Old).unwrap();

    let y = heap.allocate(young, 16, 0).unwrap();
    let o = heap.allocate(old, 32, 2).unwrap();
    let p = heap.allocate(old, 32, 2).unwrap();

    heap.post_write_barrier(o, 0);
    heap.post_write_barrier(o, p);
    assert!(!is_dirty(&heap, o));

    heap.post_write_barrier(o, y);
    assert!(is_dirty(&heap, o));
}

#[test]
fn promotion_pre_dirties_cards_with_young_references() {
    let mut heap = heap();
    let nursery = heap.allocate_chunk(Space::Young).unwrap();
    let survivor = heap.allocate_chunk(Space::Young).unwrap();

    let y = heap.allocate(nursery, 16, 0).unwrap();
    let a = heap.allocate(survivor, 600, 1).unwrap();
    let b = heap.allocate(survivor, 16, 1).unwrap();
    let c = heap.allocate(survivor, 16, 1).unwrap();

    {
        let chunk = heap.chunk_mut(survivor).unwrap();
        chunk.write_reference(b, 0, y);
        // references within the promoted chunk stop being young
        chunk.write_reference(c, 0, a);
    }

    assert_eq!(heap.promote_chunk(survivor).unwrap(), 1);
    assert!(!heap.is_young(a));
    assert!(!is_dirty(&heap, a));
    assert!(is_dirty(&heap, b));
    assert!(heap.verify_remembered_sets());

    assert!(matches!(
        heap.promote_chunk(survivor),
        Err(RemsetError::InvalidState { .. })
    ));

    let mut visited = vec![];
    heap.walk_dirty_objects(&mut |obj| visited.push(obj));
    // `a` covers the start of b's card
    assert_eq!(visited, vec![a, b, c]);
}

#[test]
fn recycled_chunk_starts_empty() {
    let mut heap = heap();
    let old = heap.allocate_chunk(Space::Old).unwrap();
    let o = heap.allocate(old, 32, 1).unwrap();
    heap.write_barrier(o);

    heap.recycle_chunk(old, Space::Old).unwrap();
    let chunk = heap.chunk(old).unwrap();
    assert_eq!(chunk.used(), 0);
    assert!(chunk.remembered_set().is_enabled());
    assert_eq!(
        chunk
            .remembered_set()
            .card_table()
            .count_dirty(chunk.memory()),
        0
    );

    heap.recycle_chunk(old, Space::Young).unwrap();
    assert!(!heap.chunk(old).unwrap().remembered_set().is_enabled());
}

#[test]
fn released_chunks_leave_the_registry() {
    let mut heap = heap();
    let old = heap.allocate_chunk(Space::Old).unwrap();
    let o = heap.allocate(old, 32, 1).unwrap();

    heap.release_chunk(old).unwrap();
    assert!(heap.chunk(old).is_none());
    assert!(heap.chunk_for(o).is_none());
    assert!(matches!(
        heap.store_reference(o, 0, 0),
        Err(RemsetError::NotInHeap { .. })
    ));
    assert!(heap.release_chunk(old).is_err());
    assert!(heap.release_chunk(ChunkId(42)).is_err());
}

fn populate(heap: &mut Heap, rng: &mut StdRng) -> Vec<usize> {
    let young = heap.allocate_chunk(Space::Young).unwrap();
    let y = heap.allocate(young, 16, 0).unwrap();

    let mut holders = vec![];
    for _ in 0..10 {
        let old = heap.allocate_chunk(Space::Old).unwrap();
        while let Some(obj) = heap.allocate(old, rng.gen_range(16..1500), 1) {
            if rng.gen_bool(0.05) {
                heap.store_reference(obj, 0, y).unwrap();
                holders.push(obj);
            }
        }
    }
    holders
}

#[derive(Default)]
struct Collect(Vec<usize>);

impl ObjectVisitor for Collect {
    fn visit_object_inline(&mut self, obj: usize) {
        self.0.push(obj);
    }
}

#[test]
fn parallel_walk_matches_serial_walk() {
    let mut heap = heap();
    let mut rng = StdRng::seed_from_u64(7);
    let holders = populate(&mut heap, &mut rng);
    assert!(!holders.is_empty());

    let (visitors, parallel_stats) = heap.walk_dirty_objects_parallel(Collect::default);
    assert!(!visitors.is_empty());
    let parallel: BTreeSet<usize> = visitors.into_iter().flat_map(|v| v.0).collect();
    assert_eq!(parallel.len(), parallel_stats.objects_visited);

    for holder in &holders {
        heap.write_barrier(*holder);
    }

    let mut serial = vec![];
    let serial_stats = heap.walk_dirty_objects(&mut |obj| serial.push(obj));

    assert_eq!(parallel, serial.iter().copied().collect());
    assert_eq!(parallel_stats, serial_stats);
    for holder in &holders {
        assert!(parallel.contains(holder));
    }
}
