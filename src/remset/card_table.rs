//! The card table: one byte per 512-byte card, CLEAN or DIRTY.
//!
//! CLEAN is `0xFF` rather than zero so that the write barrier can store a
//! byte-immediate `0x00` without a compare-and-branch, and so that a
//! vectorized "any dirty?" scan compares against all-ones rather than zero.

use crate::remset::byte_map::Log2ByteMap;
use crate::util::constants::*;
use crate::util::Address;

/// Index of a card in the table.
pub type CardIndex = usize;

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CardState {
    Dirty = 0x00,
    Clean = 0xFF,
}

pub struct CardTable {
    map: Log2ByteMap,
}

impl CardTable {
    /// Create a card table covering `[covered_start, covered_start + covered_size)`
    /// with every card clean.
    pub fn new(covered_start: Address, covered_size: usize) -> Self {
        CardTable {
            map: Log2ByteMap::new(
                covered_start,
                covered_size,
                LOG_BYTES_IN_CARD,
                CardState::Clean as u8,
            ),
        }
    }

    pub fn covered_start(&self) -> Address {
        self.map.covered_start()
    }

    pub fn covered_end(&self) -> Address {
        self.map.covered_end()
    }

    pub fn num_cards(&self) -> usize {
        self.map.len()
    }

    pub fn is_covered(&self, addr: Address) -> bool {
        self.map.is_covered(addr)
    }

    /// Index of the card holding the address.
    pub fn card_of(&self, addr: Address) -> CardIndex {
        self.map.entry_index(addr)
    }

    /// First address of the card.
    pub fn card_start(&self, card: CardIndex) -> Address {
        self.map.range_start(card)
    }

    pub fn state(&self, card: CardIndex) -> CardState {
        if self.map.get(card) == CardState::Clean as u8 {
            CardState::Clean
        } else {
            CardState::Dirty
        }
    }

    /// The biased table base published to write-barrier code generators.
    /// The generated barrier is
    /// `store byte DIRTY at [biased_base + (slot_address >> LOG_BYTES_IN_CARD)]`.
    pub fn biased_base(&self) -> usize {
        self.map.biased_base()
    }

    /// Dirty the card covering the address. This is the write barrier.
    #[inline(always)]
    pub fn dirty_covered(&self, addr: Address) {
        unsafe { self.map.unsafe_set(addr, CardState::Dirty as u8) };
    }

    /// Clean every card in the table.
    pub fn clean_all(&self) {
        self.map.fill(CardState::Clean as u8);
    }

    /// Clean cards `[lo, hi)`.
    pub fn clean(&self, lo: CardIndex, hi: CardIndex) {
        self.map.fill_range(lo, hi, CardState::Clean as u8);
    }

    /// Dirty cards `[lo, hi)`.
    pub fn dirty(&self, lo: CardIndex, hi: CardIndex) {
        self.map.fill_range(lo, hi, CardState::Dirty as u8);
    }

    /// First card in `[lo, hi)` with the given state, or `hi` if none.
    pub fn first(&self, lo: CardIndex, hi: CardIndex, state: CardState) -> CardIndex {
        self.map.first(lo, hi, state as u8)
    }

    /// First card in `[lo, hi)` whose state differs, or `hi` if the range
    /// is uniform.
    pub fn first_not(&self, lo: CardIndex, hi: CardIndex, state: CardState) -> CardIndex {
        self.map.first_not(lo, hi, state as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CardTable {
        let start = unsafe { Address::from_usize(0x2000_0000) };
        CardTable::new(start, 128 * BYTES_IN_CARD)
    }

    #[test]
    fn starts_clean() {
        let t = table();
        assert_eq!(t.first(0, t.num_cards(), CardState::Dirty), t.num_cards());
    }

    #[test]
    fn write_barrier_dirties_one_card() {
        let t = table();
        let addr = t.covered_start() + (7 * BYTES_IN_CARD + 42);
        t.dirty_covered(addr);
        assert_eq!(t.state(7), CardState::Dirty);
        assert_eq!(t.state(6), CardState::Clean);
        assert_eq!(t.state(8), CardState::Clean);
        assert_eq!(t.first(0, t.num_cards(), CardState::Dirty), 7);
    }

    #[test]
    fn clean_and_dirty_ranges() {
        let t = table();
        t.dirty(3, 9);
        assert_eq!(t.first(0, t.num_cards(), CardState::Dirty), 3);
        assert_eq!(t.first_not(3, t.num_cards(), CardState::Dirty), 9);
        t.clean(3, 6);
        assert_eq!(t.first(0, t.num_cards(), CardState::Dirty), 6);
        t.clean_all();
        assert_eq!(t.first(0, t.num_cards(), CardState::Dirty), t.num_cards());
    }

    #[test]
    fn card_geometry() {
        let t = table();
        let addr = t.covered_start() + (5 * BYTES_IN_CARD + 1);
        assert_eq!(t.card_of(addr), 5);
        assert_eq!(t.card_start(5), t.covered_start() + 5 * BYTES_IN_CARD);
    }
}
