use crate::util::constants::*;
use crate::util::Address;

/// Is the given value aligned to the alignment? The alignment must be a power of two.
pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & (align - 1) == 0
}

/// Align up a value to the alignment. The alignment must be a power of two.
pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/master/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

/// Align down a value to the alignment. The alignment must be a power of two.
pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

/// Convert a word count to bytes.
pub const fn words_to_bytes(words: usize) -> usize {
    words << LOG_BYTES_IN_WORD
}

/// Convert bytes to a word count. The byte count must be word aligned.
pub const fn bytes_to_words(bytes: usize) -> usize {
    debug_assert!(raw_is_aligned(bytes, BYTES_IN_WORD));
    bytes >> LOG_BYTES_IN_WORD
}

/// Align an address down to the card holding it.
pub fn card_align(addr: Address) -> Address {
    addr.align_down(BYTES_IN_CARD)
}

/// Align an address down to the region holding it.
pub fn region_align(addr: Address) -> Address {
    addr.align_down(BYTES_IN_REGION)
}

/// Is the address the first byte of a card?
pub fn is_card_aligned(addr: Address) -> bool {
    addr.is_aligned_to(BYTES_IN_CARD)
}

/// Is the address the first byte of a region?
pub fn is_region_aligned(addr: Address) -> bool {
    addr.is_aligned_to(BYTES_IN_REGION)
}
