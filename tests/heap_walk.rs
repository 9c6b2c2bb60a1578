//! Randomized churn over a real heap, checking the walk and card/FOT
//! invariants after every collection.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use gengc::gc::roots::SlotRootSet;
use gengc::heap::region::{HeapAccount, RegionId};
use gengc::heap::GenHeap;
use gengc::object::hub::Hub;
use gengc::object::{classify, size_of_cell, CellClass, CellLayout};
use gengc::util::constants::*;
use gengc::util::options::{HeapSize, Options};
use gengc::Address;

static LINK_HUB: Hub = Hub::new_tuple(4, &[1, 2]);

fn heap(megabytes: usize) -> GenHeap {
    let mut options = Options::default();
    options.max_heap.set(HeapSize(megabytes << LOG_BYTES_IN_MBYTE));
    options.min_heap.set(HeapSize(megabytes << LOG_BYTES_IN_MBYTE));
    GenHeap::new(options)
}

fn leaf_hub(words: usize) -> &'static Hub {
    Box::leak(Box::new(Hub::new_tuple(words, &[])))
}

/// Walk closure: every iterable region parses from its base to its end.
/// Card/FOT consistency: every card whose first byte a cell covers
/// resolves back to that cell's origin.
fn check_region_invariants(heap: &GenHeap, id: RegionId) {
    heap.verify_region_walk(id);
    if heap.region_table().descriptor(id).is_large() {
        return;
    }
    let start = heap.region_table().region_start(id);
    let end = heap.region_table().region_end(id);
    let table = heap.rset().card_table();
    let mut cell = start;
    while cell < end {
        let size = size_of_cell(cell);
        let cell_end = cell + size;
        let mut card_start = cell.align_up(BYTES_IN_CARD);
        while card_start < cell_end {
            let card = table.card_of(card_start);
            let resolved = heap.rset().cfo_table().cell_start(card);
            assert_eq!(
                resolved, cell,
                "card {} of region {} resolved to {} not {}",
                card, id, resolved, cell
            );
            card_start += BYTES_IN_CARD;
        }
        cell = cell_end;
    }
}

fn check_no_young_references(heap: &GenHeap, id: RegionId) {
    let start = heap.region_table().region_start(id);
    let end = heap.region_table().region_end(id);
    let mut cell = start;
    while cell < end {
        if let CellClass::Live(hub) = classify(cell) {
            if let CellLayout::Tuple { .. } = hub.layout {
                for &offset in hub.ref_offsets {
                    let target: Address =
                        unsafe { (cell + (offset << LOG_BYTES_IN_WORD)).load() };
                    if !target.is_zero() && heap.region_table().contains(target) {
                        let owner = heap
                            .region_table()
                            .descriptor(heap.region_table().id_of(target))
                            .owner();
                        assert_ne!(owner, HeapAccount::Young, "stale reference in {}", cell);
                        assert_ne!(owner, HeapAccount::None, "dangling reference in {}", cell);
                    }
                }
            }
        }
        cell += size_of_cell(cell);
    }
}

#[test]
fn randomized_churn_keeps_the_heap_walkable() {
    let mut heap = heap(24);
    let mut rng = ChaCha8Rng::seed_from_u64(0x01dbeef);

    // A root array of cells the mutator keeps reachable and relinks.
    let mut live: Vec<Address> = vec![];
    for round in 0..6 {
        // The previous round's root slots point into a buffer about to be
        // reshuffled; drop them before mutating it.
        heap.set_root_scanner(Box::new(SlotRootSet::default()));
        for _ in 0..500 {
            if rng.random_range(0..4) == 0 {
                let words = rng.random_range(2..=32);
                live.push(heap.allocate(leaf_hub(words), None).unwrap());
            } else {
                let cell = heap.allocate(&LINK_HUB, None).unwrap();
                // Link to up to two earlier survivors through the barrier.
                for slot in 1..=2 {
                    if !live.is_empty() && rng.random_range(0..2) == 0 {
                        let target = live[rng.random_range(0..live.len())];
                        heap.reference_write(cell, slot, target);
                    }
                }
                live.push(cell);
            }
        }
        // Drop a random half of the roots.
        for _ in 0..live.len() / 2 {
            let index = rng.random_range(0..live.len());
            live.swap_remove(index);
        }
        let slots: Vec<Address> = live.iter().map(Address::from_ref).collect();
        heap.set_root_scanner(Box::new(SlotRootSet::new(slots)));
        let full = round % 3 == 2;
        heap.collect(full).unwrap();

        for id in 0..heap.region_table().region_count() {
            let descriptor = heap.region_table().descriptor(id);
            if descriptor.owner() != HeapAccount::None && descriptor.is_iterable() {
                check_region_invariants(&heap, id);
                check_no_young_references(&heap, id);
            }
        }
    }
}

#[test]
fn survivors_keep_their_contents_across_collections() {
    let mut heap = heap(16);
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    static DATA_HUB: Hub = Hub::new_tuple(4, &[]);
    let mut cells: Vec<Address> = vec![];
    let mut payloads: Vec<(usize, usize)> = vec![];
    for _ in 0..200 {
        let cell = heap.allocate(&DATA_HUB, None).unwrap();
        let a = rng.random::<u64>() as usize;
        let b = rng.random::<u64>() as usize;
        unsafe {
            (cell + BYTES_IN_WORD).store(a);
            (cell + 2 * BYTES_IN_WORD).store(b);
        }
        cells.push(cell);
        payloads.push((a, b));
    }
    let slots: Vec<Address> = cells.iter().map(Address::from_ref).collect();
    heap.set_root_scanner(Box::new(SlotRootSet::new(slots)));

    heap.collect(false).unwrap();
    heap.collect(true).unwrap();
    heap.collect(true).unwrap();

    for (cell, (a, b)) in cells.iter().zip(payloads) {
        assert_eq!(unsafe { (*cell + BYTES_IN_WORD).load::<usize>() }, a);
        assert_eq!(unsafe { (*cell + 2 * BYTES_IN_WORD).load::<usize>() }, b);
    }
}
