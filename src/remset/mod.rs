//! The card-table remembered set and the tables underneath it.
//!
//! A generic log2-range byte map ([`byte_map::Log2ByteMap`]) maps a covered
//! address range to one byte per power-of-two-aligned unit through a biased
//! base pointer, so a write barrier is a single shift and byte store. The
//! card table ([`card_table::CardTable`]) specializes it to CLEAN/DIRTY card
//! marks, and the first-object table ([`first_object_table::FirstObjectTable`])
//! to per-card backward offsets that keep the heap walk-able at card
//! granularity. [`card_rset::CardTableRSet`] coordinates the two.

pub mod byte_map;
pub mod card_rset;
pub mod card_table;
pub mod first_object_table;

pub use self::card_rset::CardTableRSet;
pub use self::card_table::{CardState, CardTable};
pub use self::first_object_table::FirstObjectTable;

use crate::util::Address;

/// Notifications allocators and sweepers must deliver when they create,
/// split or coalesce dead space, so that the first-object table and card
/// marks stay consistent with the new cell boundaries.
pub trait DeadSpaceListener {
    /// `[start, end)` was a free chunk and `[start, start + left_size)` has
    /// just been carved out of it.
    fn notify_split(&mut self, start: Address, end: Address, left_size: usize);

    /// Sweeping has just turned `n_dead` bytes at `dead_space` into dead
    /// space about to become a free chunk. Returns the end of the space the
    /// caller may format as a chunk; the listener may have claimed the tail
    /// of the range to keep the first-object table stable.
    fn notify_coalescing(&mut self, dead_space: Address, n_dead: usize) -> Address;

    /// `[start, start + size)` has just been formatted as a dead object
    /// (dark matter, or the filler retiring an allocation buffer).
    fn notify_dead_space(&mut self, start: Address, size: usize);
}

/// A listener for spaces that are not covered by a remembered set.
pub struct NullDeadSpaceListener;

impl DeadSpaceListener for NullDeadSpaceListener {
    fn notify_split(&mut self, _start: Address, _end: Address, _left_size: usize) {}
    fn notify_coalescing(&mut self, dead_space: Address, n_dead: usize) -> Address {
        dead_space + n_dead
    }
    fn notify_dead_space(&mut self, _start: Address, _size: usize) {}
}
