//! The card-table remembered set.
//!
//! Mutator write barriers record reference stores by dirtying the card of
//! the written slot. A young-generation GC walks the dirty cards of the
//! covered space, resolving each maximal dirty run to the cells overlapping
//! it through the first-object table. Cleaning a run before walking it is
//! mandatory: the visitor may re-dirty cards while updating references, and
//! those marks must survive into the next cycle.
//!
//! The holder being in the young generation is irrelevant to the barrier:
//! dirty cards there are simply ignored by a young GC (which evacuates the
//! whole young generation and only walks cards in the old space) and are
//! cleaned wholesale when the young regions turn over.

use crate::heap::dark_matter;
use crate::heap::free_chunk;
use crate::remset::card_table::{CardIndex, CardState, CardTable};
use crate::remset::first_object_table::FirstObjectTable;
use crate::remset::DeadSpaceListener;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Visits the cells overlapping a card range. `visit` receives the cell
/// origin and the bounds of the range being walked, and returns the address
/// to resume the walk at (normally the end of the cell).
pub trait CellRangeVisitor {
    fn visit(&mut self, cell: Address, range_start: Address, range_end: Address) -> Address;
}

impl<F: FnMut(Address, Address, Address) -> Address> CellRangeVisitor for F {
    fn visit(&mut self, cell: Address, range_start: Address, range_end: Address) -> Address {
        self(cell, range_start, range_end)
    }
}

pub struct CardTableRSet {
    cards: CardTable,
    cfo_table: FirstObjectTable,
    trace: bool,
}

impl CardTableRSet {
    pub fn new(covered_start: Address, covered_size: usize) -> Self {
        CardTableRSet {
            cards: CardTable::new(covered_start, covered_size),
            cfo_table: FirstObjectTable::new(covered_start, covered_size),
            trace: false,
        }
    }

    /// Enable `-XX:TraceCardTableRSet`-style logging of card walks.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    pub fn card_table(&self) -> &CardTable {
        &self.cards
    }

    pub fn cfo_table(&self) -> &FirstObjectTable {
        &self.cfo_table
    }

    pub fn covered_start(&self) -> Address {
        self.cards.covered_start()
    }

    pub fn covered_end(&self) -> Address {
        self.cards.covered_end()
    }

    /// The biased card-table base for the write-barrier ABI.
    pub fn biased_card_table_base(&self) -> usize {
        self.cards.biased_base()
    }

    /// Record a reference store into the slot at `holder + offset`.
    /// This is the write barrier; the card of the slot address is dirtied.
    #[inline(always)]
    pub fn record_write(&self, holder: Address, offset: usize) {
        self.cards.dirty_covered(holder + offset);
    }

    /// Record a reference store into an array slot:
    /// `holder + displacement + index * word`.
    #[inline(always)]
    pub fn record_write_indexed(&self, holder: Address, displacement: usize, index: usize) {
        self.cards
            .dirty_covered(holder + displacement + (index << LOG_BYTES_IN_WORD));
    }

    /// Record that a cell has been allocated or moved; keeps the
    /// first-object table current.
    pub fn update_for_allocation(&self, cell: Address, size: usize) {
        self.cfo_table.set(cell, cell + size);
    }

    /// Find the next maximal run of cards in `state` within
    /// `[cursor, end_card)`. Returns `None` when no such card remains.
    fn next_run(
        &self,
        cursor: CardIndex,
        end_card: CardIndex,
        state: CardState,
    ) -> Option<(CardIndex, CardIndex)> {
        let lo = self.cards.first(cursor, end_card, state);
        if lo == end_card {
            return None;
        }
        let hi = self.cards.first_not(lo, end_card, state);
        Some((lo, hi))
    }

    /// Find, and clean, the next maximal dirty run in `[from, end)`.
    /// Cleaning happens before the caller walks the run, so marks the
    /// walk re-dirties are preserved.
    pub fn pop_dirty_run(&self, from: Address, end: Address) -> Option<(Address, Address)> {
        debug_assert!(conversions::is_card_aligned(from) && conversions::is_card_aligned(end));
        let cursor = self.cards.card_of(from);
        let end_card = self.card_index_of_end(end);
        let (lo, hi) = self.next_run(cursor, end_card, CardState::Dirty)?;
        self.cards.clean(lo, hi);
        if self.trace {
            trace!(
                "dirty card run [{}, {})",
                self.cards.card_start(lo),
                self.cards.card_start(hi)
            );
        }
        Some((self.cards.card_start(lo), self.cards.card_start(hi)))
    }

    /// Walk the cells overlapping the dirty cards of `[start, end)`. Each
    /// maximal dirty run is cleaned first, then walked from the cell
    /// overlapping its first card until past the run's end.
    pub fn clean_and_visit_cards<V: CellRangeVisitor>(
        &self,
        start: Address,
        end: Address,
        visitor: &mut V,
    ) {
        let mut cursor = start;
        while let Some((lo, hi)) = self.pop_dirty_run(cursor, end) {
            self.walk_cells(lo, hi, visitor);
            cursor = hi;
        }
    }

    /// Walk the cells overlapping cards of the given state in `[start, end)`
    /// without changing any card mark.
    pub fn visit_cards<V: CellRangeVisitor>(
        &self,
        start: Address,
        end: Address,
        state: CardState,
        visitor: &mut V,
    ) {
        debug_assert!(conversions::is_card_aligned(start) && conversions::is_card_aligned(end));
        let mut cursor = self.cards.card_of(start);
        let end_card = self.card_index_of_end(end);
        while let Some((lo, hi)) = self.next_run(cursor, end_card, state) {
            self.walk_cells(self.cards.card_start(lo), self.cards.card_start(hi), visitor);
            cursor = hi;
        }
    }

    fn card_index_of_end(&self, end: Address) -> CardIndex {
        if end == self.covered_end() {
            self.cards.num_cards()
        } else {
            self.cards.card_of(end)
        }
    }

    fn walk_cells<V: CellRangeVisitor>(&self, lo: Address, hi: Address, visitor: &mut V) {
        let first_card = self.cards.card_of(lo);
        let mut cell = self.cfo_table.cell_start(first_card);
        if self.trace {
            trace!("walking cells of [{}, {}) from {}", lo, hi, cell);
        }
        while cell < hi {
            let next = visitor.visit(cell, lo, hi);
            debug_assert!(next > cell, "cell walk did not advance at {}", cell);
            cell = next;
        }
    }

    /// `[start, start + size)` has become free space headed by a walkable
    /// dead cell at `start`. Cards fully inside the range have no live cell
    /// before them within the range, so they are cleaned and their
    /// first-object entries resolve to `start`. Cards only partially
    /// overlapped keep their marks: they may still hold live references.
    pub fn update_for_free_space(&self, start: Address, size: usize) {
        let end = start + size;
        self.cfo_table.set(start, end);
        let first_full = start.align_up(BYTES_IN_CARD);
        let end_full = end.align_down(BYTES_IN_CARD);
        if first_full < end_full {
            self.cards.clean(
                self.cards.card_of(first_full),
                self.card_index_of_end(end_full),
            );
        }
    }

    fn notify_split_impl(&self, start: Address, end: Address, left_size: usize) {
        self.cfo_table.split(start, start + left_size, end);
    }

    /// See [`DeadSpaceListener::notify_coalescing`]. If the dead range
    /// crosses a card boundary and the chunk header does not reach the last
    /// card, the portion overlapping the last card is formatted as a dead
    /// object of its own. The entry of the last card then resolves to the
    /// dead object forever, staying stable while a mutator carves
    /// allocations from the head of the chunk; only `[start, last card)`
    /// remains for the chunk. Otherwise the whole range is treated
    /// uniformly.
    fn notify_coalescing_impl(&self, dead_space: Address, n_dead: usize) -> Address {
        let end = dead_space + n_dead;
        let last_card_start = conversions::card_align(end - 1usize);
        let header_end = dead_space + free_chunk::HEADER_BYTES;
        let tail = end - last_card_start;
        if last_card_start > dead_space && header_end <= last_card_start && tail >= MIN_OBJECT_BYTES
        {
            if self.trace {
                trace!(
                    "coalesced dead space [{}, {}), tail pinned at {}",
                    dead_space,
                    end,
                    last_card_start
                );
            }
            dark_matter::format(last_card_start, end);
            self.cfo_table.set(last_card_start, end);
            self.update_for_free_space(dead_space, last_card_start - dead_space);
            last_card_start
        } else {
            self.update_for_free_space(dead_space, n_dead);
            end
        }
    }
}

impl DeadSpaceListener for CardTableRSet {
    fn notify_split(&mut self, start: Address, end: Address, left_size: usize) {
        self.notify_split_impl(start, end, left_size);
    }

    fn notify_coalescing(&mut self, dead_space: Address, n_dead: usize) -> Address {
        self.notify_coalescing_impl(dead_space, n_dead)
    }

    fn notify_dead_space(&mut self, start: Address, size: usize) {
        self.cfo_table.set(start, start + size);
    }
}
