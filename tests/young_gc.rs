//! End-to-end young-generation collections over a real mapped heap.

use gengc::gc::roots::{SlotRootSet, SlotVisitor, SpecialReferenceManager};
use gengc::heap::region::HeapAccount;
use gengc::heap::GenHeap;
use gengc::object::forwarding;
use gengc::object::hub::Hub;
use gengc::remset::card_table::CardState;
use gengc::util::constants::*;
use gengc::util::options::{HeapSize, Options};
use gengc::Address;

/// A 64-byte leaf object.
static DATA64_HUB: Hub = Hub::new_tuple(8, &[]);
/// Three words: hub and two reference slots.
static REF_PAIR_HUB: Hub = Hub::new_tuple(3, &[1, 2]);
/// A reference array.
static REF_ARRAY_HUB: Hub = Hub::new_ref_array();
/// A weak-reference cell: hub word and a referent slot.
static WEAK_HUB: Hub = Hub::new_special(2, &[], 1);

fn small_heap(megabytes: usize) -> GenHeap {
    let mut options = Options::default();
    options.max_heap.set(HeapSize(megabytes << LOG_BYTES_IN_MBYTE));
    options.min_heap.set(HeapSize(megabytes << LOG_BYTES_IN_MBYTE));
    GenHeap::new(options)
}

fn slots_of(cells: &[Address]) -> Vec<Address> {
    cells.iter().map(Address::from_ref).collect()
}

#[test]
fn single_young_gc_promotes_roots() {
    let mut heap = small_heap(16);
    let young_region = heap.young_regions()[0];
    let young_start = heap.region_table().region_start(young_region);

    let cells = vec![
        heap.allocate(&DATA64_HUB, None).unwrap(),
        heap.allocate(&DATA64_HUB, None).unwrap(),
    ];
    // Mutator allocation bumps from the young region base.
    assert_eq!(cells[0], young_start);
    assert_eq!(cells[1], young_start + 64usize);

    heap.set_root_scanner(Box::new(SlotRootSet::new(slots_of(&cells))));
    let outcome = heap.collect(false).unwrap();
    assert!(!outcome.full);
    assert_eq!(outcome.counters.promoted_cells, 2);

    // Both survivors sit at the start of the promotion chunk in old space.
    let a = cells[0];
    let b = cells[1];
    let old_start = heap
        .region_table()
        .region_start(heap.old_to_regions()[0]);
    assert_eq!(a, old_start);
    assert_eq!(b, old_start + 64usize);
    // The first-object entry of the survivors' card resolves to the first.
    let card = heap.rset().card_table().card_of(a);
    assert_eq!(heap.rset().cfo_table().cell_start(card), a);

    // The young generation turned over: descriptors carry no live data and
    // every young card is clean again.
    for &id in heap.young_regions() {
        let descriptor = heap.region_table().descriptor(id);
        assert_eq!(descriptor.live_words(), 0);
        let start = heap.region_table().region_start(id);
        let table = heap.rset().card_table();
        let lo = table.card_of(start);
        assert_eq!(
            table.first(lo, lo + CARDS_IN_REGION, CardState::Dirty),
            lo + CARDS_IN_REGION
        );
        heap.verify_region_walk(id);
    }
    for &id in heap.old_to_regions() {
        heap.verify_region_walk(id);
    }
}

#[test]
fn write_barrier_captures_cross_gen_pointer() {
    let mut heap = small_heap(16);
    // An old-generation holder, then a young referent stored through the
    // write barrier.
    let holder = heap
        .allocate_in(HeapAccount::Old, &REF_PAIR_HUB, None)
        .unwrap();
    let young = heap.allocate(&DATA64_HUB, None).unwrap();
    heap.reference_write(holder, 1, young);

    let table = heap.rset().card_table();
    let holder_card = table.card_of(holder);
    assert_eq!(table.state(holder_card), CardState::Dirty);

    // No roots: the referent survives only through the remembered set.
    let outcome = heap.collect(false).unwrap();
    assert!(!outcome.full);
    assert_eq!(outcome.counters.promoted_cells, 1);
    assert!(outcome.counters.dirty_card_runs >= 1);

    let promoted: Address = unsafe { (holder + BYTES_IN_WORD).load() };
    assert_ne!(promoted, young);
    // The new target is in the old generation, not the young.
    let target_region = heap.region_table().id_of(promoted);
    assert_eq!(
        heap.region_table().descriptor(target_region).owner(),
        HeapAccount::Old
    );
    // Dirtiness after the collection mirrors whether the updated reference
    // crosses regions of the old generation.
    let holder_region = heap.region_table().id_of(holder);
    let expected = if holder_region == target_region {
        CardState::Clean
    } else {
        CardState::Dirty
    };
    assert_eq!(heap.rset().card_table().state(holder_card), expected);
}

#[test]
fn lab_refills_across_chunks() {
    let mut heap = small_heap(16);
    // 8000 cells of 128 bytes: one megabyte of survivors, promoted through
    // 256 KiB LAB chunks.
    static DATA128_HUB: Hub = Hub::new_tuple(16, &[]);
    let cells: Vec<Address> = (0..8000)
        .map(|_| heap.allocate(&DATA128_HUB, None).unwrap())
        .collect();
    heap.set_root_scanner(Box::new(SlotRootSet::new(slots_of(&cells))));

    let outcome = heap.collect(false).unwrap();
    assert!(!outcome.full);
    assert_eq!(outcome.counters.promoted_cells, 8000);
    assert_eq!(outcome.counters.promoted_bytes, 8000 * 128);
    assert_eq!(outcome.counters.lab_refills, 4);
    assert_eq!(outcome.counters.survivor_ranges, 4);
    assert_eq!(outcome.counters.overflow_allocations, 0);

    // No cell was split across a LAB boundary: every survivor is walkable
    // at its recorded address, and the old space parses cell by cell.
    for &cell in &cells {
        assert_eq!(gengc::object::size_of_cell(cell), 128);
    }
    for &id in heap.old_to_regions() {
        heap.verify_region_walk(id);
    }
    // No reference into the (reset) young generation survives.
    for &cell in &cells {
        let region = heap.region_table().id_of(cell);
        assert_eq!(
            heap.region_table().descriptor(region).owner(),
            HeapAccount::Old
        );
    }
}

#[test]
fn overflow_allocation_bypasses_the_lab() {
    let mut heap = small_heap(16);
    // A 128 KiB reference array: 16382 elements plus hub and length words.
    let length = (128 << LOG_BYTES_IN_KBYTE) / BYTES_IN_WORD - 2;
    let array = heap.allocate(&REF_ARRAY_HUB, Some(length)).unwrap();
    let cells = vec![array];
    heap.set_root_scanner(Box::new(SlotRootSet::new(slots_of(&cells))));

    let outcome = heap.collect(false).unwrap();
    assert_eq!(outcome.counters.overflow_allocations, 1);
    assert_eq!(outcome.counters.promoted_cells, 1);

    let promoted = cells[0];
    let size = 128 << LOG_BYTES_IN_KBYTE;
    assert_eq!(gengc::object::size_of_cell(promoted), size);
    // The first-object entry of every card inside the array resolves to
    // the array's origin.
    let table = heap.rset().card_table();
    let first_card = table.card_of(promoted);
    let last_card = table.card_of(promoted + (size - 1));
    for card in first_card..=last_card {
        assert_eq!(heap.rset().cfo_table().cell_start(card), promoted, "card {}", card);
    }
}

#[test]
fn forwarding_is_idempotent_during_collection() {
    let mut heap = small_heap(16);
    let a = heap.allocate(&DATA64_HUB, None).unwrap();
    // Two roots to the same cell: the second slot must reuse the
    // forwarding pointer the first one installed.
    let cells = vec![a, a];
    heap.set_root_scanner(Box::new(SlotRootSet::new(slots_of(&cells))));
    let outcome = heap.collect(false).unwrap();
    assert_eq!(outcome.counters.promoted_cells, 1);
    assert_eq!(cells[0], cells[1]);
    assert!(!forwarding::is_forwarded(cells[0]));
}

/// Clears referents that did not survive strongly; keeps forwarded ones.
struct ClearingManager;

impl SpecialReferenceManager for ClearingManager {
    fn process_discovered(&mut self, discovered: &[Address], visitor: &mut dyn SlotVisitor) {
        for &cell in discovered {
            let slot = cell + BYTES_IN_WORD;
            let referent: Address = unsafe { slot.load() };
            if !referent.is_zero() && forwarding::is_forwarded(referent) {
                visitor.visit_slot(slot);
            } else {
                unsafe { slot.store(Address::ZERO) };
            }
        }
    }
}

#[test]
fn special_references_follow_reachability() {
    let mut heap = small_heap(16);
    heap.set_special_reference_manager(Box::new(ClearingManager));

    let strongly_held = heap.allocate(&DATA64_HUB, None).unwrap();
    let dying = heap.allocate(&DATA64_HUB, None).unwrap();
    let weak_live = heap.allocate(&WEAK_HUB, None).unwrap();
    let weak_dead = heap.allocate(&WEAK_HUB, None).unwrap();
    heap.reference_write(weak_live, 1, strongly_held);
    heap.reference_write(weak_dead, 1, dying);

    // Roots: both weak cells, and the live referent (strongly).
    let cells = vec![weak_live, weak_dead, strongly_held];
    heap.set_root_scanner(Box::new(SlotRootSet::new(slots_of(&cells))));
    heap.collect(false).unwrap();

    let live_referent: Address = unsafe { (cells[0] + BYTES_IN_WORD).load() };
    let dead_referent: Address = unsafe { (cells[1] + BYTES_IN_WORD).load() };
    // The strongly reachable referent was kept, at its new address.
    assert_eq!(live_referent, cells[2]);
    // The unreachable referent was cleared rather than resurrected.
    assert_eq!(dead_referent, Address::ZERO);
}
