//! Intrusive free-chunk lists.
//!
//! A region's free space is a singly linked list of chunks threaded through
//! the region bytes themselves. A chunk header is three words: the
//! free-chunk hub sentinel, the chunk size in bytes, and the address of the
//! next chunk. The hub word makes a free chunk a self-describing dead cell:
//! a heap walker that sees the sentinel at a cell origin skips `size` bytes.

use crate::object::hub::{self, FREE_CHUNK_HUB};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Words in a chunk header: hub, size, next.
pub const HEADER_WORDS: usize = 3;
/// Bytes in a chunk header.
pub const HEADER_BYTES: usize = HEADER_WORDS * BYTES_IN_WORD;
/// The smallest space worth formatting as a chunk. Anything smaller is
/// formatted as dark matter instead.
pub const MIN_CHUNK_BYTES: usize = HEADER_BYTES;

const SIZE_WORD_INDEX: usize = 1;
const NEXT_WORD_INDEX: usize = 2;

/// Format `[chunk, chunk + size_bytes)` as a free chunk linked to `next`
/// (`Address::ZERO` ends the list).
pub fn format(chunk: Address, size_bytes: usize, next: Address) {
    debug_assert!(size_bytes >= MIN_CHUNK_BYTES);
    debug_assert!(chunk.is_aligned_to(BYTES_IN_WORD));
    debug_assert!(conversions::raw_is_aligned(size_bytes, BYTES_IN_WORD));
    unsafe {
        chunk.store(FREE_CHUNK_HUB.word());
        (chunk + conversions::words_to_bytes(SIZE_WORD_INDEX)).store(size_bytes);
        (chunk + conversions::words_to_bytes(NEXT_WORD_INDEX)).store(next);
    }
}

/// Is the cell at this origin a free chunk?
pub fn is_free_chunk(cell: Address) -> bool {
    hub::hub_word(cell) == FREE_CHUNK_HUB.word()
}

/// Size in bytes of the chunk.
pub fn size(chunk: Address) -> usize {
    debug_assert!(is_free_chunk(chunk));
    unsafe { (chunk + conversions::words_to_bytes(SIZE_WORD_INDEX)).load() }
}

pub fn set_size(chunk: Address, size_bytes: usize) {
    debug_assert!(is_free_chunk(chunk));
    debug_assert!(size_bytes >= MIN_CHUNK_BYTES);
    unsafe { (chunk + conversions::words_to_bytes(SIZE_WORD_INDEX)).store(size_bytes) };
}

/// The next chunk in the list, or `Address::ZERO` at the end.
pub fn next(chunk: Address) -> Address {
    debug_assert!(is_free_chunk(chunk));
    unsafe { (chunk + conversions::words_to_bytes(NEXT_WORD_INDEX)).load() }
}

pub fn set_next(chunk: Address, next: Address) {
    debug_assert!(is_free_chunk(chunk));
    unsafe { (chunk + conversions::words_to_bytes(NEXT_WORD_INDEX)).store(next) };
}
