//! The evacuator: the single-threaded copying collector that moves every
//! reachable cell out of from-space into to-space through a private
//! promotion LAB.
//!
//! One instance exists per collection. The phase order is invariant:
//! roots, boot heap, mutable code, remembered set, reachables to fixpoint,
//! special references, reachables again. Reordering breaks the "no
//! references into from-space survive" postcondition, because
//! special-reference processing depends on the reachability snapshot.
//!
//! The evacuator is non-preemptive and non-suspending; mutators are stopped
//! for its whole lifetime, so forwarding uses plain stores and no card byte
//! is ever raced on.

use crate::gc::lab::{PromotionLab, SurvivorRangeQueue};
use crate::gc::roots::{CodeScanner, RootScanner, SlotVisitor, SpecialReferenceManager};
use crate::gc::EvacuationFailure;
use crate::heap::chunk_allocator::ChunkAllocator;
use crate::heap::dark_matter;
use crate::heap::free_chunk;
use crate::heap::region::{HeapAccount, RegionId, RegionTable};
use crate::object::hub::{self, CellLayout, HUB_WORD_INDEX, LENGTH_WORD_INDEX};
use crate::object::{classify, forwarding, size_of_cell, CellClass};
use crate::remset::{CardTableRSet, DeadSpaceListener};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Tallies of one evacuation, for logging and for the embedder.
#[derive(Copy, Clone, Debug, Default)]
pub struct EvacuationCounters {
    pub visited_cells: usize,
    pub promoted_cells: usize,
    pub promoted_bytes: usize,
    pub lab_refills: usize,
    pub overflow_allocations: usize,
    pub survivor_ranges: usize,
    pub dirty_card_runs: usize,
}

/// Everything an evacuation borrows from the heap, plus its tuning.
pub struct EvacuationSetup<'a> {
    pub regions: &'a mut RegionTable,
    pub rset: &'a mut CardTableRSet,
    /// The to-space allocator promotions are drawn from.
    pub to_space: &'a mut ChunkAllocator,
    /// For a full GC, the regions of the old from-semi-space (indexed by
    /// region id). A young GC evacuates the young account only.
    pub old_from_mask: Option<&'a [bool]>,
    /// A young GC walks the remembered set; a full GC visits everything
    /// reachable and skips it.
    pub scan_rsets: bool,
    pub lab_chunk_size: usize,
    /// Cells larger than this bypass the LAB.
    pub refill_threshold: usize,
    pub survivor_queue_capacity: usize,
    pub trace: bool,
}

pub struct Evacuator<'a> {
    regions: &'a mut RegionTable,
    rset: &'a mut CardTableRSet,
    to_space: &'a mut ChunkAllocator,
    old_from_mask: Option<&'a [bool]>,
    scan_rsets: bool,
    lab_chunk_size: usize,
    refill_threshold: usize,
    trace: bool,
    lab: PromotionLab,
    lab_region: Option<RegionId>,
    survivors: SurvivorRangeQueue,
    discovered: Vec<Address>,
    discovery_enabled: bool,
    failed: bool,
    counters: EvacuationCounters,
}

impl<'a> Evacuator<'a> {
    pub fn new(setup: EvacuationSetup<'a>) -> Self {
        Evacuator {
            regions: setup.regions,
            rset: setup.rset,
            to_space: setup.to_space,
            old_from_mask: setup.old_from_mask,
            scan_rsets: setup.scan_rsets,
            lab_chunk_size: setup.lab_chunk_size,
            refill_threshold: setup.refill_threshold,
            trace: setup.trace,
            lab: PromotionLab::new(),
            lab_region: None,
            survivors: SurvivorRangeQueue::new(setup.survivor_queue_capacity),
            discovered: vec![],
            discovery_enabled: true,
            failed: false,
            counters: EvacuationCounters::default(),
        }
    }

    /// Run the whole evacuation. On a transient to-space exhaustion the
    /// heap is left forwarding-consistent and the caller retries as a full
    /// GC.
    pub fn run(
        &mut self,
        roots: &mut dyn RootScanner,
        code: &mut dyn CodeScanner,
        special: &mut dyn SpecialReferenceManager,
    ) -> Result<EvacuationCounters, EvacuationFailure> {
        self.do_before_evacuation();
        if !self.failed {
            roots.scan_roots(self);
        }
        if !self.failed {
            self.evacuate_from_boot_heap();
        }
        if !self.failed {
            code.scan_mutable_code(self);
        }
        if !self.failed && self.scan_rsets {
            self.evacuate_from_rsets();
        }
        if !self.failed {
            self.evacuate_reachables();
        }
        if !self.failed {
            self.discovery_enabled = false;
            let discovered = std::mem::take(&mut self.discovered);
            special.process_discovered(&discovered, self);
            self.evacuate_reachables();
            self.discovery_enabled = true;
        }
        self.do_after_evacuation();
        if self.failed {
            Err(EvacuationFailure)
        } else {
            self.counters.survivor_ranges = self.survivors.recorded();
            Ok(self.counters)
        }
    }

    fn do_before_evacuation(&mut self) {
        self.discovery_enabled = true;
        if self.lab.is_empty() && !self.refill_lab(MIN_OBJECT_BYTES) {
            // Nothing promotable fits; report the failure after retiring.
            debug_assert!(self.failed);
        }
    }

    fn do_after_evacuation(&mut self) {
        if self.lab.is_empty() {
            return;
        }
        let top = self.lab.ptop();
        let limit = self.lab.hard_limit();
        let remaining = self.lab.remaining();
        if remaining == 0 {
            // The last allocation consumed the buffer exactly.
        } else if remaining < self.refill_threshold {
            // Too small to bother a future evacuation with: plant a dead
            // object and release the buffer.
            dark_matter::format(top, limit);
            self.rset.notify_dead_space(top, remaining);
            self.uncount_live(top, remaining);
        } else {
            // Return the tail to the region's free list so the next cycle
            // resumes cleanly.
            free_chunk::format(top, remaining, Address::ZERO);
            self.rset.update_for_free_space(top, remaining);
            let id = self.regions.id_of(top);
            let region_start = self.regions.region_start(id);
            let descriptor = self.regions.descriptor_mut(id);
            let old_first = descriptor
                .first_free_chunk()
                .map(|words| region_start + conversions::words_to_bytes(words))
                .unwrap_or(Address::ZERO);
            free_chunk::set_next(top, old_first);
            descriptor.set_first_free_chunk(Some(conversions::bytes_to_words(top - region_start)));
            descriptor.set_num_free_chunks(descriptor.num_free_chunks() + 1);
            let words = conversions::bytes_to_words(remaining);
            descriptor.set_free_words(descriptor.free_words() + words);
            descriptor.set_live_words(descriptor.live_words() - words);
        }
        self.lab.reset();
        if let Some(id) = self.lab_region.take() {
            self.regions.descriptor_mut(id).set_allocating(false);
        }
    }

    /// Walk every cell of the boot heap, updating its outgoing references.
    /// In a full GC the immortal space and the heads of non-moving
    /// multi-region cells get the same treatment, since the remembered set
    /// is not consulted.
    fn evacuate_from_boot_heap(&mut self) {
        let strong: Vec<RegionId> = (0..self.regions.region_count())
            .filter(|&id| {
                let descriptor = self.regions.descriptor(id);
                descriptor.is_iterable()
                    && (descriptor.owner() == HeapAccount::Boot
                        || (!self.scan_rsets
                            && (descriptor.owner() == HeapAccount::Immortal
                                || (descriptor.owner() == HeapAccount::Old
                                    && descriptor.is_head()))))
            })
            .collect();
        for id in strong {
            self.walk_region_cells(id);
            if self.failed {
                return;
            }
        }
    }

    /// Walk every maximal dirty-card run of the covered old, boot and
    /// immortal space. Each run is cleaned before its cells are walked, so
    /// cards the walk re-dirties survive into the next cycle.
    fn evacuate_from_rsets(&mut self) {
        let count = self.regions.region_count();
        let mut id = 0;
        while id < count {
            if !self.rset_scannable(id) {
                id += 1;
                continue;
            }
            let first = id;
            while id < count && self.rset_scannable(id) {
                id += 1;
            }
            let start = self.regions.region_start(first);
            let end = self.regions.region_end(id - 1);
            let mut cursor = start;
            while let Some((lo, hi)) = self.rset.pop_dirty_run(cursor, end) {
                self.counters.dirty_card_runs += 1;
                let first_card = self.rset.card_table().card_of(lo);
                let mut cell = self.rset.cfo_table().cell_start(first_card);
                while cell < hi {
                    cell = self.scan_cell_for_evacuatees(cell);
                }
                cursor = hi;
                if self.failed {
                    return;
                }
            }
        }
    }

    /// Dirty cards in the young generation are ignored: the whole young
    /// generation is evacuated anyway.
    fn rset_scannable(&self, id: RegionId) -> bool {
        matches!(
            self.regions.descriptor(id).owner(),
            HeapAccount::Old | HeapAccount::Boot | HeapAccount::Immortal
        ) && !self.is_from_region(id)
    }

    /// Drain the survivor-range queue to fixpoint, scanning every promoted
    /// cell for references into from-space.
    fn evacuate_reachables(&mut self) {
        loop {
            if self.failed {
                return;
            }
            self.update_survivor_ranges();
            match self.survivors.pop() {
                Some((start, end)) => {
                    let mut cell = start;
                    while cell < end {
                        cell = self.scan_cell_for_evacuatees(cell);
                    }
                }
                None => return,
            }
        }
    }

    /// Push the LAB's freshly promoted span and any pending overflow span.
    fn update_survivor_ranges(&mut self) {
        if let Some((start, end)) = self.lab.take_lab_range() {
            self.survivors.push(start, end);
        }
        if let Some((start, end)) = self.lab.take_overflow_range() {
            self.survivors.push(start, end);
        }
    }

    fn walk_region_cells(&mut self, id: RegionId) {
        let start = self.regions.region_start(id);
        let end = self.regions.region_end(id);
        let mut cell = start;
        while cell < end {
            cell = self.scan_cell_for_evacuatees(cell);
        }
    }

    /// Visit one cell, updating every reference slot it holds, and return
    /// the next cell origin. Walking may coincide with allocation into the
    /// open LAB: the unformatted span `[ptop, hard limit)` is stepped over
    /// as a whole.
    fn scan_cell_for_evacuatees(&mut self, cell: Address) -> Address {
        if self.lab.remaining() > 0 && cell == self.lab.ptop() {
            return self.lab.hard_limit();
        }
        self.counters.visited_cells += 1;
        match classify(cell) {
            CellClass::FreeChunk => cell + free_chunk::size(cell),
            CellClass::DarkMatter | CellClass::SmallestDarkMatter | CellClass::SingleWordFiller => {
                cell + size_of_cell(cell)
            }
            CellClass::Live(cell_hub) => {
                if self.trace {
                    trace!("visited cell {}", cell);
                }
                // The hub slot is forwarded before the layout it names is
                // consulted any further.
                self.update_evacuated_ref(cell, HUB_WORD_INDEX);
                match cell_hub.layout {
                    CellLayout::Tuple { .. } | CellLayout::Hybrid { .. } => {
                        for &offset in cell_hub.ref_offsets {
                            self.update_evacuated_ref(cell, offset);
                        }
                    }
                    CellLayout::RefArray => {
                        let length = hub::length_of(cell);
                        for index in 0..length {
                            self.update_evacuated_ref(cell, LENGTH_WORD_INDEX + 1 + index);
                        }
                    }
                    CellLayout::WordArray => {}
                }
                if let Some(referent) = cell_hub.special_referent {
                    if self.discovery_enabled {
                        self.discovered.push(cell);
                    } else {
                        self.update_evacuated_ref(cell, referent);
                    }
                }
                cell + size_of_cell(cell)
            }
        }
    }

    fn update_evacuated_ref(&mut self, cell: Address, word_index: usize) {
        self.visit_slot(cell + (word_index << LOG_BYTES_IN_WORD));
    }

    fn is_from(&self, addr: Address) -> bool {
        if !self.regions.contains(addr) {
            return false;
        }
        let id = self.regions.id_of(addr);
        match self.regions.descriptor(id).owner() {
            HeapAccount::Young => true,
            HeapAccount::Old => self.is_from_region(id),
            _ => false,
        }
    }

    fn is_from_region(&self, id: RegionId) -> bool {
        self.old_from_mask.map_or(false, |mask| mask[id])
    }

    /// Dirty the card of an updated slot when its new target lives in a
    /// different region of covered space, so the next collection re-walks
    /// the cross-region reference.
    fn update_rset(&self, slot: Address, target: Address) {
        if self.regions.contains(slot)
            && self.regions.contains(target)
            && self.regions.id_of(slot) != self.regions.id_of(target)
        {
            self.rset.record_write(slot, 0);
        }
    }

    /// Copy a from-space cell into to-space, or reuse its forwarding
    /// pointer. Returns zero when to-space is exhausted.
    fn evacuate(&mut self, from_ref: Address) -> Address {
        debug_assert!(self.is_from(from_ref));
        let size = size_of_cell(from_ref);
        let to = if size > self.refill_threshold {
            self.overflow_allocate(size)
        } else {
            self.lab_allocate(size)
        };
        if to.is_zero() {
            return Address::ZERO;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(from_ref.to_ptr::<u8>(), to.to_mut_ptr::<u8>(), size);
        }
        forwarding::forward_to(from_ref, to);
        self.rset.update_for_allocation(to, size);
        self.counters.promoted_cells += 1;
        self.counters.promoted_bytes += size;
        if self.trace {
            trace!("evacuated {} -> {} ({} bytes)", from_ref, to, size);
        }
        to
    }

    fn lab_allocate(&mut self, size: usize) -> Address {
        loop {
            let result = self.lab.try_allocate(size);
            if !result.is_zero() {
                return result;
            }
            // Zero signals retry after a refill.
            if !self.refill_lab(size) {
                return Address::ZERO;
            }
        }
    }

    /// Retire the current buffer and install the next chunk: the rest of
    /// the refill list if there is one, else a fresh chunk from to-space.
    fn refill_lab(&mut self, upcoming: usize) -> bool {
        if let Some((start, end)) = self.lab.take_lab_range() {
            self.survivors.push(start, end);
        }
        if !self.lab.is_empty() {
            let top = self.lab.ptop();
            let limit = self.lab.hard_limit();
            if top < limit {
                dark_matter::format(top, limit);
                self.rset.notify_dead_space(top, limit - top);
                self.uncount_live(top, limit - top);
            }
            self.lab.reset();
            if let Some(id) = self.lab_region.take() {
                self.regions.descriptor_mut(id).set_allocating(false);
            }
        }
        let chained = self.lab.next_chunk();
        if !chained.is_zero() {
            let size = free_chunk::size(chained);
            self.lab.set_next_chunk(free_chunk::next(chained));
            crate::util::memory::zero(chained, size);
            self.install_lab_chunk(chained, size);
            self.counters.lab_refills += 1;
            return true;
        }
        let min = upcoming + LAB_HEADROOM;
        match self.to_space.allocate_chunk(
            self.regions,
            self.rset,
            min,
            self.lab_chunk_size.max(min),
        ) {
            Some((chunk, granted)) => {
                self.install_lab_chunk(chunk, granted);
                self.counters.lab_refills += 1;
                true
            }
            None => {
                self.failed = true;
                false
            }
        }
    }

    fn install_lab_chunk(&mut self, chunk: Address, size: usize) {
        let id = self.regions.id_of(chunk);
        self.regions.descriptor_mut(id).set_allocating(true);
        self.lab_region = Some(id);
        self.lab.refill(chunk, size);
    }

    /// Cells beyond the refill threshold are allocated directly from
    /// to-space, bypassing the LAB.
    fn overflow_allocate(&mut self, size: usize) -> Address {
        match self
            .to_space
            .allocate_chunk(self.regions, self.rset, size, size)
        {
            Some((chunk, granted)) => {
                if granted > size {
                    // The allocator over-granted rather than leave an
                    // unformattable sliver; the residue becomes dark matter.
                    dark_matter::format(chunk + size, chunk + granted);
                    self.rset.notify_dead_space(chunk + size, granted - size);
                    self.uncount_live(chunk + size, granted - size);
                }
                self.counters.overflow_allocations += 1;
                if let Some((start, end)) = self.lab.note_overflow(chunk, size) {
                    self.survivors.push(start, end);
                }
                chunk
            }
            None => {
                self.failed = true;
                Address::ZERO
            }
        }
    }

    /// Space granted by the allocator counts as live data; space retired as
    /// filler does not.
    fn uncount_live(&mut self, start: Address, size: usize) {
        let id = self.regions.id_of(start);
        let descriptor = self.regions.descriptor_mut(id);
        descriptor.set_live_words(
            descriptor.live_words() - conversions::bytes_to_words(size),
        );
    }
}

impl SlotVisitor for Evacuator<'_> {
    fn visit_slot(&mut self, slot: Address) {
        let reference: Address = unsafe { slot.load() };
        if reference.is_zero() || !self.is_from(reference) {
            return;
        }
        // A forwarding pointer may itself land in from-space: a young GC
        // that ran out of to-space forwarded cells into the semi-space a
        // retrying full GC now evacuates. Chase until the target is out.
        let mut to = reference;
        while self.is_from(to) {
            if forwarding::is_forwarded(to) {
                to = forwarding::forwarded(to);
            } else {
                to = self.evacuate(to);
                if to.is_zero() {
                    // Transient failure: leave the slot for the full GC retry.
                    return;
                }
            }
        }
        unsafe { slot.store(to) };
        self.update_rset(slot, to);
    }
}
