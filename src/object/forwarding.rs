//! Forwarding pointers.
//!
//! When the evacuator copies a cell out of from-space, it stores the new
//! origin in the old cell's hub slot with the low bit set. Hubs are word
//! aligned, so a marked hub word can never be mistaken for a hub. The
//! evacuator is single-threaded, so there is only ever one writer per cell
//! and plain loads and stores suffice.

use crate::util::Address;

// ...1
const FORWARDING_MASK: usize = 1;

/// Does a raw hub word carry the forwarding mark?
pub(crate) fn word_is_forwarding(word: usize) -> bool {
    word & FORWARDING_MASK != 0
}

/// Has the cell already been evacuated?
pub fn is_forwarded(cell: Address) -> bool {
    word_is_forwarding(unsafe { cell.load() })
}

/// Resolve a reference through any forwarding pointer. Returns the
/// reference itself if the cell has not been forwarded. Repeated calls
/// return the same to-space origin.
pub fn forwarded(reference: Address) -> Address {
    let mut resolved = reference;
    loop {
        let word: usize = unsafe { resolved.load() };
        if !word_is_forwarding(word) {
            return resolved;
        }
        resolved = unsafe { Address::from_usize(word & !FORWARDING_MASK) };
    }
}

/// Mark a from-space cell as evacuated to `new_origin`. The hub slot is
/// overwritten; the cell's layout must not be consulted afterwards.
pub fn forward_to(cell: Address, new_origin: Address) {
    debug_assert!(!is_forwarded(cell), "cell {} forwarded twice", cell);
    debug_assert!(!new_origin.is_zero());
    unsafe { cell.store(new_origin.as_usize() | FORWARDING_MASK) };
}
