//! The sweeper contract.
//!
//! An old-generation mark-sweep walks region by region. The marking driver
//! owns liveness; this module owns what happens to the dead intervals it
//! reports: gaps below the reclaimable threshold are folded into dark
//! matter, larger ones become free chunks threaded on the region's list,
//! and every interval flows through the remembered set's dead-space
//! listener so the first-object table and card marks stay consistent.

use crate::heap::dark_matter;
use crate::heap::free_chunk;
use crate::heap::region::{RegionId, RegionTable};
use crate::object;
use crate::remset::{CardTableRSet, DeadSpaceListener};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;
use std::collections::VecDeque;

/// The notifications a marking driver delivers while sweeping.
pub trait Sweeper {
    fn has_next_sweeping_region(&self) -> bool;
    /// Start sweeping the next region; returns its id.
    fn begin_sweep(&mut self) -> RegionId;
    /// Finish the current region: its descriptor now reflects the rebuilt
    /// free-chunk list.
    fn end_sweep(&mut self);
    /// Gaps smaller than this are not worth a free chunk.
    fn min_reclaimable_space(&self) -> usize;
    /// Precise notification: `[start, start + size)` is entirely dead.
    fn process_dead_space(&mut self, start: Address, size: usize);
    /// Imprecise notification: everything between the end of the live cell
    /// at `left_live` and the live cell at `right_live` is dead. The gap
    /// covers a live cell at its head.
    fn process_large_gap(&mut self, left_live: Address, right_live: Address);
}

pub struct RegionSweeper<'a> {
    regions: &'a mut RegionTable,
    rset: &'a mut CardTableRSet,
    min_reclaimable: usize,
    queue: VecDeque<RegionId>,
    current: Option<RegionId>,
    // Free list being rebuilt for the current region.
    first_chunk: Address,
    last_chunk: Address,
    num_chunks: usize,
    free_words: usize,
    dead_words: usize,
}

impl<'a> RegionSweeper<'a> {
    pub fn new(
        regions: &'a mut RegionTable,
        rset: &'a mut CardTableRSet,
        to_sweep: Vec<RegionId>,
        min_reclaimable: usize,
    ) -> Self {
        debug_assert!(min_reclaimable >= free_chunk::MIN_CHUNK_BYTES);
        RegionSweeper {
            regions,
            rset,
            min_reclaimable,
            queue: to_sweep.into(),
            current: None,
            first_chunk: Address::ZERO,
            last_chunk: Address::ZERO,
            num_chunks: 0,
            free_words: 0,
            dead_words: 0,
        }
    }

    fn current_region(&self) -> RegionId {
        self.current.expect("not sweeping")
    }
}

impl Sweeper for RegionSweeper<'_> {
    fn has_next_sweeping_region(&self) -> bool {
        !self.queue.is_empty()
    }

    fn begin_sweep(&mut self) -> RegionId {
        debug_assert!(self.current.is_none(), "previous sweep not ended");
        let id = self.queue.pop_front().expect("no region to sweep");
        self.current = Some(id);
        self.first_chunk = Address::ZERO;
        self.last_chunk = Address::ZERO;
        self.num_chunks = 0;
        self.free_words = 0;
        self.dead_words = 0;
        id
    }

    fn end_sweep(&mut self) {
        let id = self.current.take().expect("not sweeping");
        let region_start = self.regions.region_start(id);
        let descriptor = self.regions.descriptor_mut(id);
        if self.first_chunk.is_zero() {
            descriptor.set_first_free_chunk(None);
        } else {
            descriptor.set_first_free_chunk(Some(conversions::bytes_to_words(
                self.first_chunk - region_start,
            )));
        }
        descriptor.set_num_free_chunks(self.num_chunks);
        descriptor.set_free_words(self.free_words);
        descriptor.set_live_words(WORDS_IN_REGION - self.dead_words);
        self.regions.validate(id);
    }

    fn min_reclaimable_space(&self) -> usize {
        self.min_reclaimable
    }

    fn process_dead_space(&mut self, start: Address, size: usize) {
        let id = self.current_region();
        debug_assert!(start >= self.regions.region_start(id));
        debug_assert!(start + size <= self.regions.region_end(id));
        self.dead_words += conversions::bytes_to_words(size);
        if size < self.min_reclaimable {
            dark_matter::format(start, start + size);
            self.rset.notify_dead_space(start, size);
            return;
        }
        let chunk_end = self.rset.notify_coalescing(start, size);
        let chunk_size = chunk_end - start;
        free_chunk::format(start, chunk_size, Address::ZERO);
        if self.first_chunk.is_zero() {
            self.first_chunk = start;
        } else {
            free_chunk::set_next(self.last_chunk, start);
        }
        self.last_chunk = start;
        self.num_chunks += 1;
        self.free_words += conversions::bytes_to_words(chunk_size);
    }

    fn process_large_gap(&mut self, left_live: Address, right_live: Address) {
        let start = left_live + object::size_of_cell(left_live);
        debug_assert!(start <= right_live);
        if start < right_live {
            self.process_dead_space(start, right_live - start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::hub::{self, Hub};
    use crate::util::memory;

    static SMALL_HUB: Hub = Hub::new_tuple(8, &[]);

    fn setup() -> (RegionTable, CardTableRSet, Address) {
        let base = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        let regions = RegionTable::new(base, 1);
        let rset = CardTableRSet::new(base, BYTES_IN_REGION);
        (regions, rset, base)
    }

    #[test]
    fn sweep_rebuilds_free_list_and_accounting() {
        let (mut regions, mut rset, base) = setup();
        // Two live cells at the region start and at 8 KiB; the rest dead.
        let a = base;
        let b = base + 8192usize;
        hub::install_hub(a, &SMALL_HUB);
        hub::install_hub(b, &SMALL_HUB);

        let mut sweeper = RegionSweeper::new(&mut regions, &mut rset, vec![0], 256);
        assert!(sweeper.has_next_sweeping_region());
        let id = sweeper.begin_sweep();
        assert_eq!(id, 0);
        sweeper.process_large_gap(a, b);
        let b_end = b + 8 * BYTES_IN_WORD;
        sweeper.process_dead_space(b_end, BYTES_IN_REGION - (b_end - base));
        sweeper.end_sweep();
        assert!(!sweeper.has_next_sweeping_region());

        let d = regions.descriptor(0);
        assert_eq!(d.num_free_chunks(), 2);
        assert!(d.has_free_chunk());
        // First chunk right after cell a.
        let first = base + 8 * BYTES_IN_WORD;
        assert_eq!(d.first_free_chunk(), Some(8));
        assert!(free_chunk::is_free_chunk(first));
        assert_eq!(free_chunk::next(first), b_end);
        assert_eq!(free_chunk::next(b_end), Address::ZERO);
        // Live accounting covers exactly the two cells.
        assert_eq!(d.live_words(), 16);
        memory::release(base, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn small_gap_folds_into_dark_matter() {
        let (mut regions, mut rset, base) = setup();
        let mut sweeper = RegionSweeper::new(&mut regions, &mut rset, vec![0], 256);
        sweeper.begin_sweep();
        // A 32-byte gap is below the reclaimable threshold.
        sweeper.process_dead_space(base + 64usize, 32);
        sweeper.process_dead_space(base + 4096usize, BYTES_IN_REGION - 4096);
        sweeper.end_sweep();

        assert!(dark_matter::is_dark_matter(base + 64usize));
        let d = regions.descriptor(0);
        assert_eq!(d.num_free_chunks(), 1);
        // The dark gap counts as neither free nor live.
        assert!(d.dark_matter_words() >= 4);
        memory::release(base, BYTES_IN_REGION).unwrap();
    }
}
