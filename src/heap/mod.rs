//! The generational heap.
//!
//! A contiguous, region-aligned range is reserved once at boot and carved
//! into fixed one-megabyte regions tracked by a zero-initialized descriptor
//! table. The young generation and the two old semi-spaces are sets of
//! regions; the card-table remembered set covers the whole range. A young
//! collection evacuates every young region into the old allocation
//! semi-space; a full collection additionally flips the old semi-spaces.

pub mod chunk_allocator;
pub mod dark_matter;
pub mod free_chunk;
pub mod region;
pub mod sizing;
pub mod sweeper;

pub use self::sizing::{GenerationSizes, HeapOutOfMemory, HeapResizeEvent, SizingMode};

use crate::gc::evacuator::{EvacuationCounters, EvacuationSetup, Evacuator};
use crate::gc::roots::{
    CodeScanner, NoMutableCode, NoSpecialReferences, RootScanner, SlotRootSet,
    SpecialReferenceManager,
};
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::heap::region::{HeapAccount, RegionId, RegionTable};
use crate::heap::sizing::HeapSizingPolicy;
use crate::object::hub::{self, CellLayout, Hub};
use crate::object::size_of_cell;
use crate::remset::{CardTableRSet, DeadSpaceListener};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::logger;
use crate::util::memory;
use crate::util::options::Options;
use crate::util::Address;
use std::sync::Arc;

/// Cells at least this large are allocated as multi-region large objects.
pub const LARGE_OBJECT_THRESHOLD: usize = BYTES_IN_REGION / 2;

/// Word offset of the first element of a reference array.
const FIRST_ELEMENT_WORD: usize = 2;

const SURVIVOR_QUEUE_CAPACITY: usize = 512;

/// What a completed collection did.
#[derive(Copy, Clone, Debug)]
pub struct GcOutcome {
    pub full: bool,
    pub counters: EvacuationCounters,
}

/// The mutator's open allocation buffer in the young generation.
struct Tlab {
    top: Address,
    end: Address,
    region: Option<RegionId>,
}

impl Tlab {
    fn closed() -> Self {
        Tlab {
            top: Address::ZERO,
            end: Address::ZERO,
            region: None,
        }
    }

    fn is_open(&self) -> bool {
        !self.top.is_zero()
    }
}

pub struct GenHeap {
    options: Arc<Options>,
    reserved_start: Address,
    reserved_size: usize,
    regions: RegionTable,
    rset: CardTableRSet,
    young: ChunkAllocator,
    old: [ChunkAllocator; 2],
    /// Index into `old` of the semi-space promotions are allocated from.
    old_to: usize,
    boot: ChunkAllocator,
    immortal: ChunkAllocator,
    large_regions: Vec<RegionId>,
    sizing: HeapSizingPolicy,
    young_region_budget: usize,
    old_region_budget: usize,
    tlab: Tlab,
    gc_count: usize,
    roots: Box<dyn RootScanner>,
    code: Box<dyn CodeScanner>,
    special_refs: Box<dyn SpecialReferenceManager>,
}

impl GenHeap {
    pub fn new(options: Options) -> Self {
        Self::with_boot(options, 0, 0)
    }

    /// Create a heap with `boot_regions` regions of boot heap and
    /// `immortal_regions` regions of immortal space, both reserved beyond
    /// the user-specified memory.
    pub fn with_boot(options: Options, boot_regions: usize, immortal_regions: usize) -> Self {
        logger::try_init();
        let options = Arc::new(options);
        let sizing = HeapSizingPolicy::from_options(&options);
        let collected = conversions::raw_align_up(sizing.max_reserve(), BYTES_IN_REGION);
        let reserved_size = collected + (boot_regions + immortal_regions) * BYTES_IN_REGION;
        let reserved_start = memory::reserve_aligned(reserved_size, BYTES_IN_REGION)
            .expect("unable to reserve the heap");
        info!(
            "heap reserved at {} ({} regions)",
            reserved_start,
            reserved_size >> LOG_BYTES_IN_REGION
        );
        let regions = RegionTable::new(reserved_start, reserved_size >> LOG_BYTES_IN_REGION);
        let mut rset = CardTableRSet::new(reserved_start, reserved_size);
        rset.set_trace(*options.trace_card_rset);
        let mut heap = GenHeap {
            options,
            reserved_start,
            reserved_size,
            regions,
            rset,
            young: ChunkAllocator::new(HeapAccount::Young),
            old: [
                ChunkAllocator::new(HeapAccount::Old),
                ChunkAllocator::new(HeapAccount::Old),
            ],
            old_to: 0,
            boot: ChunkAllocator::new(HeapAccount::Boot),
            immortal: ChunkAllocator::new(HeapAccount::Immortal),
            large_regions: vec![],
            sizing,
            young_region_budget: 0,
            old_region_budget: 0,
            tlab: Tlab::closed(),
            gc_count: 0,
            roots: Box::new(SlotRootSet::default()),
            code: Box::new(NoMutableCode),
            special_refs: Box::new(NoSpecialReferences),
        };
        let sizes = heap.sizing.current_sizes();
        heap.apply_budgets(sizes);
        for _ in 0..boot_regions {
            let id = heap.regions.find_free().expect("no region for boot heap");
            heap.boot.claim_region(&mut heap.regions, &mut heap.rset, id);
        }
        for _ in 0..immortal_regions {
            let id = heap
                .regions
                .find_free()
                .expect("no region for immortal space");
            heap.immortal
                .claim_region(&mut heap.regions, &mut heap.rset, id);
        }
        heap.claim_budgeted_regions();
        heap
    }

    pub fn set_root_scanner(&mut self, roots: Box<dyn RootScanner>) {
        self.roots = roots;
    }

    pub fn set_code_scanner(&mut self, code: Box<dyn CodeScanner>) {
        self.code = code;
    }

    pub fn set_special_reference_manager(&mut self, refs: Box<dyn SpecialReferenceManager>) {
        self.special_refs = refs;
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn region_table(&self) -> &RegionTable {
        &self.regions
    }

    pub fn rset(&self) -> &CardTableRSet {
        &self.rset
    }

    pub fn sizing(&self) -> &HeapSizingPolicy {
        &self.sizing
    }

    pub fn gc_count(&self) -> usize {
        self.gc_count
    }

    pub fn young_regions(&self) -> &[RegionId] {
        self.young.members()
    }

    pub fn old_to_regions(&self) -> &[RegionId] {
        self.old[self.old_to].members()
    }

    /// The biased card-table base published at startup for the
    /// write-barrier ABI: a generated barrier stores a zero byte at
    /// `[biased_base + (slot_address >> LOG_BYTES_IN_CARD)]`.
    pub fn biased_card_table_base(&self) -> usize {
        self.rset.biased_card_table_base()
    }

    fn apply_budgets(&mut self, sizes: GenerationSizes) {
        self.young_region_budget = (sizes.young_size >> LOG_BYTES_IN_REGION).max(1);
        self.old_region_budget = (sizes.old_semi_size >> LOG_BYTES_IN_REGION).max(1);
    }

    /// Claim free regions until the young space and the old allocation
    /// semi-space hold their full budgets.
    fn claim_budgeted_regions(&mut self) {
        while self.young.members().len() < self.young_region_budget {
            match self.regions.find_free() {
                Some(id) => self.young.claim_region(&mut self.regions, &mut self.rset, id),
                None => break,
            }
        }
        while self.old[self.old_to].members().len() < self.old_region_budget {
            match self.regions.find_free() {
                Some(id) => {
                    self.old[self.old_to].claim_region(&mut self.regions, &mut self.rset, id)
                }
                None => break,
            }
        }
    }

    fn cell_size(cell_hub: &'static Hub, length: Option<usize>) -> usize {
        match cell_hub.layout {
            CellLayout::Tuple { words } => conversions::words_to_bytes(words),
            CellLayout::Hybrid { header_words } => {
                conversions::words_to_bytes(header_words + length.expect("hybrid needs a length"))
            }
            CellLayout::RefArray | CellLayout::WordArray => {
                conversions::words_to_bytes(2 + length.expect("array needs a length"))
            }
        }
    }

    fn format_cell(cell: Address, cell_hub: &'static Hub, length: Option<usize>) {
        hub::install_hub(cell, cell_hub);
        match cell_hub.layout {
            CellLayout::Tuple { .. } => {}
            _ => hub::set_length(cell, length.expect("layout needs a length")),
        }
    }

    /// Allocate a cell in the young generation. Collection is triggered on
    /// allocation failure; a young collection that cannot promote is
    /// retried as a full collection before out-of-memory is reported.
    pub fn allocate(
        &mut self,
        cell_hub: &'static Hub,
        length: Option<usize>,
    ) -> Result<Address, HeapOutOfMemory> {
        let size = Self::cell_size(cell_hub, length);
        if size >= LARGE_OBJECT_THRESHOLD {
            return self.allocate_large(cell_hub, length, size);
        }
        let mut gc_attempts = 0;
        loop {
            if let Some(cell) = self.try_allocate_young(size) {
                Self::format_cell(cell, cell_hub, length);
                self.rset.update_for_allocation(cell, size);
                return Ok(cell);
            }
            match gc_attempts {
                0 => {
                    self.collect(false)?;
                }
                1 => {
                    self.collect(true)?;
                }
                _ => return Err(HeapOutOfMemory),
            }
            gc_attempts += 1;
        }
    }

    /// Allocate a cell directly in another account. Used to build the boot
    /// heap and immortal space, and by embedders that promote eagerly.
    pub fn allocate_in(
        &mut self,
        account: HeapAccount,
        cell_hub: &'static Hub,
        length: Option<usize>,
    ) -> Result<Address, HeapOutOfMemory> {
        let size = Self::cell_size(cell_hub, length);
        debug_assert!(size < LARGE_OBJECT_THRESHOLD);
        let space = match account {
            HeapAccount::Boot => &mut self.boot,
            HeapAccount::Immortal => &mut self.immortal,
            HeapAccount::Old => &mut self.old[self.old_to],
            _ => panic!("cannot allocate in {:?} directly", account),
        };
        let (cell, granted) = space
            .allocate_chunk(&mut self.regions, &mut self.rset, size, size)
            .ok_or(HeapOutOfMemory)?;
        if granted > size {
            dark_matter::format(cell + size, cell + granted);
            self.rset.notify_dead_space(cell + size, granted - size);
            let id = self.regions.id_of(cell);
            let descriptor = self.regions.descriptor_mut(id);
            descriptor.set_live_words(
                descriptor.live_words() - conversions::bytes_to_words(granted - size),
            );
        }
        Self::format_cell(cell, cell_hub, length);
        self.rset.update_for_allocation(cell, size);
        Ok(cell)
    }

    /// Allocate a multi-region cell. The head region is iterable; the body
    /// regions are not, and carry the large-object flags.
    fn allocate_large(
        &mut self,
        cell_hub: &'static Hub,
        length: Option<usize>,
        size: usize,
    ) -> Result<Address, HeapOutOfMemory> {
        let count = conversions::raw_align_up(size, BYTES_IN_REGION) >> LOG_BYTES_IN_REGION;
        let first = self.regions.find_free_run(count).ok_or(HeapOutOfMemory)?;
        for id in first..first + count {
            let descriptor = self.regions.descriptor_mut(id);
            descriptor.set_owner(HeapAccount::Old);
            descriptor.set_large(id == first, id == first + count - 1);
            descriptor.set_free_words(0);
            descriptor.set_live_words(WORDS_IN_REGION);
            self.large_regions.push(id);
        }
        let cell = self.regions.region_start(first);
        memory::zero(cell, size);
        let end = self.regions.region_end(first + count - 1);
        if end - (cell + size) >= BYTES_IN_WORD {
            dark_matter::format(cell + size, end);
        }
        Self::format_cell(cell, cell_hub, length);
        self.rset.update_for_allocation(cell, size);
        Ok(cell)
    }

    fn try_allocate_young(&mut self, size: usize) -> Option<Address> {
        if self.tlab.is_open() {
            let result = self.tlab.top;
            if result + size <= self.tlab.end {
                self.tlab.top = result + size;
                return Some(result);
            }
        }
        self.refill_tlab(size)?;
        let result = self.tlab.top;
        if result + size <= self.tlab.end {
            self.tlab.top = result + size;
            Some(result)
        } else {
            None
        }
    }

    fn refill_tlab(&mut self, upcoming: usize) -> Option<()> {
        self.retire_tlab();
        let preferred = (**self.options.tlab_size).max(upcoming);
        let (chunk, granted) =
            self.young
                .allocate_chunk(&mut self.regions, &mut self.rset, upcoming, preferred)?;
        let id = self.regions.id_of(chunk);
        self.regions.descriptor_mut(id).set_allocating(true);
        self.tlab = Tlab {
            top: chunk,
            end: chunk + granted,
            region: Some(id),
        };
        Some(())
    }

    /// Close the mutator's allocation buffer, reformatting the unused tail
    /// so the region is parseable again. Runs at every safepoint that
    /// precedes a collection.
    fn retire_tlab(&mut self) {
        if !self.tlab.is_open() {
            return;
        }
        let top = self.tlab.top;
        let end = self.tlab.end;
        if top < end {
            let remaining = end - top;
            let id = self.regions.id_of(top);
            if remaining >= free_chunk::MIN_CHUNK_BYTES {
                free_chunk::format(top, remaining, Address::ZERO);
                self.rset.update_for_free_space(top, remaining);
                let region_start = self.regions.region_start(id);
                let descriptor = self.regions.descriptor_mut(id);
                let old_first = descriptor
                    .first_free_chunk()
                    .map(|words| region_start + conversions::words_to_bytes(words))
                    .unwrap_or(Address::ZERO);
                free_chunk::set_next(top, old_first);
                descriptor
                    .set_first_free_chunk(Some(conversions::bytes_to_words(top - region_start)));
                descriptor.set_num_free_chunks(descriptor.num_free_chunks() + 1);
                let words = conversions::bytes_to_words(remaining);
                descriptor.set_free_words(descriptor.free_words() + words);
                descriptor.set_live_words(descriptor.live_words() - words);
            } else {
                dark_matter::format(top, end);
                self.rset.notify_dead_space(top, remaining);
                let descriptor = self.regions.descriptor_mut(id);
                descriptor.set_live_words(
                    descriptor.live_words() - conversions::bytes_to_words(remaining),
                );
            }
        }
        if let Some(id) = self.tlab.region.take() {
            self.regions.descriptor_mut(id).set_allocating(false);
        }
        self.tlab = Tlab::closed();
    }

    /// Store a reference into a word slot of a holder cell, and record the
    /// write in the remembered set. This is the write barrier the ABI of
    /// generated code mirrors.
    #[inline]
    pub fn reference_write(&self, holder: Address, word_index: usize, value: Address) {
        let offset = word_index << LOG_BYTES_IN_WORD;
        unsafe { (holder + offset).store(value) };
        self.rset.record_write(holder, offset);
    }

    /// Store a reference into a reference-array element.
    #[inline]
    pub fn reference_array_write(&self, holder: Address, index: usize, value: Address) {
        let first_element = FIRST_ELEMENT_WORD << LOG_BYTES_IN_WORD;
        unsafe { (holder + first_element + (index << LOG_BYTES_IN_WORD)).store(value) };
        self.rset.record_write_indexed(holder, first_element, index);
    }

    /// Live bytes currently in the young generation: the worst-case size of
    /// the next evacuation.
    pub fn young_used_bytes(&self) -> usize {
        self.young.live_bytes(&self.regions)
    }

    /// Free bytes the old allocation semi-space can still promote into,
    /// counting regions of its budget not yet claimed.
    pub fn free_old_bytes(&self) -> usize {
        let unclaimed = self
            .old_region_budget
            .saturating_sub(self.old[self.old_to].members().len());
        self.old[self.old_to].free_bytes(&self.regions)
            + unclaimed * (BYTES_IN_REGION - BYTES_IN_CARD)
    }

    /// Collect garbage. A young collection evacuates the young generation
    /// into the old allocation semi-space; it is promoted to a full
    /// collection when the sizing policy predicts the evacuation will not
    /// fit, when the evacuator runs out of to-space mid-way, or on request.
    pub fn collect(&mut self, requested_full: bool) -> Result<GcOutcome, HeapOutOfMemory> {
        self.retire_tlab();
        self.gc_count += 1;
        let estimated = self.young_used_bytes();
        let free_old = self.free_old_bytes();
        let full = requested_full || self.sizing.should_perform_full_gc(estimated, free_old);
        info!(
            "GC {} ({}) young {} bytes, old free {} bytes",
            self.gc_count,
            if full { "full" } else { "young" },
            estimated,
            free_old
        );
        let mut roots = std::mem::replace(&mut self.roots, Box::new(SlotRootSet::default()));
        let mut code = std::mem::replace(&mut self.code, Box::new(NoMutableCode));
        let mut special = std::mem::replace(&mut self.special_refs, Box::new(NoSpecialReferences));
        let result = self.collect_inner(full, &mut *roots, &mut *code, &mut *special, estimated);
        self.roots = roots;
        self.code = code;
        self.special_refs = special;
        result
    }

    fn collect_inner(
        &mut self,
        full: bool,
        roots: &mut dyn RootScanner,
        code: &mut dyn CodeScanner,
        special: &mut dyn SpecialReferenceManager,
        estimated: usize,
    ) -> Result<GcOutcome, HeapOutOfMemory> {
        if !full {
            match self.young_collect(roots, code, special) {
                Ok(counters) => {
                    return Ok(GcOutcome {
                        full: false,
                        counters,
                    })
                }
                Err(_) => {
                    // Transient to-space exhaustion: promote to a full GC.
                    info!("young collection out of to-space, retrying as full GC");
                }
            }
        }
        let counters = self.full_collect(roots, code, special)?;
        let free_old = self.free_old_bytes();
        let free_heap = free_old + self.young.free_bytes(&self.regions);
        let sizes = self
            .sizing
            .resize_after_full_gc(estimated.max(MIN_OBJECT_BYTES), free_old, free_heap)?;
        self.apply_budgets(sizes);
        self.claim_budgeted_regions();
        Ok(GcOutcome {
            full: true,
            counters,
        })
    }

    fn evacuation_setup<'a>(
        regions: &'a mut RegionTable,
        rset: &'a mut CardTableRSet,
        to_space: &'a mut ChunkAllocator,
        old_from_mask: Option<&'a [bool]>,
        options: &Options,
    ) -> EvacuationSetup<'a> {
        EvacuationSetup {
            regions,
            rset,
            to_space,
            scan_rsets: old_from_mask.is_none(),
            old_from_mask,
            lab_chunk_size: **options.lab_size,
            refill_threshold: **options.lab_refill_threshold,
            survivor_queue_capacity: SURVIVOR_QUEUE_CAPACITY,
            trace: *options.trace_evac_cell,
        }
    }

    fn young_collect(
        &mut self,
        roots: &mut dyn RootScanner,
        code: &mut dyn CodeScanner,
        special: &mut dyn SpecialReferenceManager,
    ) -> Result<EvacuationCounters, crate::gc::EvacuationFailure> {
        let setup = Self::evacuation_setup(
            &mut self.regions,
            &mut self.rset,
            &mut self.old[self.old_to],
            None,
            &self.options,
        );
        let mut evacuator = Evacuator::new(setup);
        let counters = evacuator.run(roots, code, special)?;
        drop(evacuator);
        self.release_young();
        self.claim_budgeted_regions();
        Ok(counters)
    }

    fn full_collect(
        &mut self,
        roots: &mut dyn RootScanner,
        code: &mut dyn CodeScanner,
        special: &mut dyn SpecialReferenceManager,
    ) -> Result<EvacuationCounters, HeapOutOfMemory> {
        let to_index = 1 - self.old_to;
        // The flip target claims its budget before evacuation begins.
        while self.old[to_index].members().len() < self.old_region_budget {
            match self.regions.find_free() {
                Some(id) => self.old[to_index].claim_region(&mut self.regions, &mut self.rset, id),
                None => break,
            }
        }
        let mut from_mask = vec![false; self.regions.region_count()];
        for &id in self.old[self.old_to].members() {
            from_mask[id] = true;
        }
        let (setup_to, _) = {
            // Split the two semi-space allocators without overlapping
            // mutable borrows.
            let (low, high) = self.old.split_at_mut(1);
            if to_index == 0 {
                (&mut low[0], &mut high[0])
            } else {
                (&mut high[0], &mut low[0])
            }
        };
        let setup = Self::evacuation_setup(
            &mut self.regions,
            &mut self.rset,
            setup_to,
            Some(&from_mask),
            &self.options,
        );
        let mut evacuator = Evacuator::new(setup);
        let result = evacuator.run(roots, code, special);
        drop(evacuator);
        let counters = result.map_err(|_| HeapOutOfMemory)?;
        // Release the evacuated spaces and flip.
        let from = self.old[self.old_to].take_members();
        for id in from {
            self.release_region(id);
        }
        self.old_to = to_index;
        self.release_young();
        self.claim_budgeted_regions();
        Ok(counters)
    }

    /// Reset every young region to its boot state: descriptors zeroed,
    /// cards cleaned.
    fn release_young(&mut self) {
        let members = self.young.take_members();
        for id in members {
            self.release_region(id);
        }
    }

    fn release_region(&mut self, id: RegionId) {
        let start = self.regions.region_start(id);
        let card_table = self.rset.card_table();
        card_table.clean(
            card_table.card_of(start),
            card_table.card_of(start) + CARDS_IN_REGION,
        );
        self.regions.reset(id);
    }

    /// Check the heap-walk closure of one iterable region: starting at the
    /// region base and advancing cell by cell lands exactly on the region
    /// end. Used by tests and extreme assertions.
    pub fn verify_region_walk(&self, id: RegionId) {
        let descriptor = self.regions.descriptor(id);
        assert!(descriptor.is_iterable(), "region {} is not iterable", id);
        let start = self.regions.region_start(id);
        let end = self.regions.region_end(id);
        let mut cell = start;
        while cell < end {
            let size = size_of_cell(cell);
            assert!(size > 0);
            cell += size;
        }
        if descriptor.is_large() {
            // The head cell of a multi-region object may span past this
            // region; anywhere else the walk must land exactly on the end.
            assert!(cell >= end);
        } else {
            assert_eq!(cell, end, "walk of region {} overshot", id);
        }
    }
}

impl Drop for GenHeap {
    fn drop(&mut self) {
        let _ = memory::release(self.reserved_start, self.reserved_size);
    }
}
