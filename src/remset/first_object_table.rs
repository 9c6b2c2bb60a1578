//! The first-object table (FOT).
//!
//! One byte per card, encoding the backward distance from the card's first
//! byte to the origin of the cell that overlaps it. A non-negative entry is
//! a word count; the origin is within 127 words of the card start. Cells
//! whose origin lies further back get a negative entry `e` meaning "go back
//! `1 << (-e - 1)` cards and look again". Each hop at least halves the
//! remaining distance, so resolving an origin takes `O(log)` hops even for
//! a cell spanning hundreds of cards.

use crate::remset::byte_map::Log2ByteMap;
use crate::remset::card_table::CardIndex;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Largest backward distance, in words, that a non-negative entry can encode.
const MAX_WORD_OFFSET: usize = i8::MAX as usize;

pub struct FirstObjectTable {
    map: Log2ByteMap,
}

impl FirstObjectTable {
    /// Create a first-object table with the same geometry as the card table
    /// covering `[covered_start, covered_start + covered_size)`. Entries
    /// start at zero, i.e. every card initially claims a cell origin at its
    /// own first byte; this matches free space formatted as a single chunk
    /// at a card-aligned start.
    pub fn new(covered_start: Address, covered_size: usize) -> Self {
        FirstObjectTable {
            map: Log2ByteMap::new(covered_start, covered_size, LOG_BYTES_IN_CARD, 0),
        }
    }

    pub fn covered_start(&self) -> Address {
        self.map.covered_start()
    }

    pub fn covered_end(&self) -> Address {
        self.map.covered_end()
    }

    fn entry(&self, card: CardIndex) -> i8 {
        self.map.get(card) as i8
    }

    fn set_entry(&self, card: CardIndex, value: i8) {
        self.map.set(card, value as u8);
    }

    /// Record that a cell spanning `[cell_start, cell_end)` begins at
    /// `cell_start`. Every card whose first byte lies inside the cell gets
    /// its entry overwritten; other cards are untouched, since an earlier
    /// cell still covers their first byte.
    pub fn set(&self, cell_start: Address, cell_end: Address) {
        debug_assert!(cell_start < cell_end);
        debug_assert!(cell_start.is_aligned_to(BYTES_IN_WORD));
        let anchor = self.map.entry_index(cell_start);
        let lo = if conversions::is_card_aligned(cell_start) {
            anchor
        } else {
            anchor + 1
        };
        let hi = self.map.entry_index(cell_end - 1usize);
        for card in lo..=hi {
            let distance_words =
                (self.map.range_start(card) - cell_start) >> LOG_BYTES_IN_WORD;
            if distance_words <= MAX_WORD_OFFSET {
                self.set_entry(card, distance_words as i8);
            } else {
                // The hop must land on a card still covered by this cell,
                // i.e. no further back than anchor + 1.
                let back = card - (anchor + 1);
                let hop_log = back.ilog2() as i8;
                self.set_entry(card, -(hop_log + 1));
            }
        }
        #[cfg(feature = "extreme_assertions")]
        for card in lo..=hi {
            assert_eq!(self.cell_start(card), cell_start);
        }
    }

    /// The origin of the cell that overlaps the first byte of the card.
    pub fn cell_start(&self, card: CardIndex) -> Address {
        let mut card = card;
        let mut entry = self.entry(card);
        let mut hops = 0;
        while entry < 0 {
            card -= 1usize << (-(entry as isize) - 1);
            entry = self.entry(card);
            hops += 1;
            debug_assert!(hops <= 64, "first-object chain does not converge");
        }
        self.map.range_start(card) - ((entry as usize) << LOG_BYTES_IN_WORD)
    }

    /// An allocator has carved `[start, mid)` out of a free chunk
    /// `[start, end)`: any card whose first byte lies in `[mid, end)` must
    /// now resolve to `mid`, the origin of the remainder chunk.
    pub fn split(&self, start: Address, mid: Address, end: Address) {
        debug_assert!(start < mid && mid < end);
        self.set(mid, end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fot() -> FirstObjectTable {
        let start = unsafe { Address::from_usize(0x4000_0000) };
        FirstObjectTable::new(start, 1024 * BYTES_IN_CARD)
    }

    #[test]
    fn cell_inside_one_card_leaves_table_alone() {
        let t = fot();
        let base = t.covered_start();
        // A 64-byte cell that does not reach the next card start.
        t.set(base + 64usize, base + 128usize);
        assert_eq!(t.cell_start(0), base);
        assert_eq!(t.cell_start(1), base + BYTES_IN_CARD);
    }

    #[test]
    fn aligned_cell_gets_zero_entry() {
        let t = fot();
        let base = t.covered_start();
        t.set(base, base + 64usize);
        assert_eq!(t.entry(0), 0);
        assert_eq!(t.cell_start(0), base);
    }

    #[test]
    fn cell_spanning_cards_gets_word_offsets() {
        let t = fot();
        let base = t.covered_start();
        // Starts 16 bytes before card 1, ends inside card 3.
        let cell = base + (BYTES_IN_CARD - 16);
        let end = cell + (2 * BYTES_IN_CARD + 64);
        t.set(cell, end);
        assert_eq!(t.cell_start(1), cell);
        assert_eq!(t.cell_start(2), cell);
        assert_eq!(t.cell_start(3), cell);
        // The card holding the origin itself is untouched.
        assert_eq!(t.cell_start(0), base);
    }

    #[test]
    fn long_cell_resolves_through_log_hops() {
        let t = fot();
        let base = t.covered_start();
        // A 128 KiB cell spans 256 cards.
        let cell = base + 32usize;
        let end = cell + (128usize << LOG_BYTES_IN_KBYTE);
        t.set(cell, end);
        for card in [1, 2, 3, 4, 17, 100, 255, 256] {
            assert_eq!(t.cell_start(card), cell, "card {}", card);
        }
    }

    #[test]
    fn split_points_remainder_cards_at_mid() {
        let t = fot();
        let base = t.covered_start();
        let start = base;
        let mid = base + 4 * BYTES_IN_CARD;
        let end = base + 16 * BYTES_IN_CARD;
        t.set(start, end);
        t.split(start, mid, end);
        for card in 4..16 {
            assert_eq!(t.cell_start(card), mid, "card {}", card);
        }
        // Cards before the split point still resolve to the left part.
        for card in 0..4 {
            assert_eq!(t.cell_start(card), start, "card {}", card);
        }
    }

    #[test]
    fn overwriting_with_closer_origin_wins() {
        let t = fot();
        let base = t.covered_start();
        t.set(base, base + 8 * BYTES_IN_CARD);
        let closer = base + 3 * BYTES_IN_CARD + 64usize;
        t.set(closer, base + 8 * BYTES_IN_CARD);
        assert_eq!(t.cell_start(3), base);
        for card in 4..8 {
            assert_eq!(t.cell_start(card), closer, "card {}", card);
        }
    }
}
