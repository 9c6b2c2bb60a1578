//! Dark matter: unreclaimable gaps formatted as self-describing dead cells.
//!
//! A gap at least one word larger than the minimum object size becomes a
//! filler word-array with a length word; a gap of exactly the minimum
//! object size uses the header-only smallest-dark-matter hub. Either way a
//! heap walk can step over the gap by reading its hub.

use crate::object::hub::{
    self, DARK_MATTER_HUB, SINGLE_WORD_FILLER_HUB, SMALLEST_DARK_MATTER_HUB,
};
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Format `[start, end)` as dark matter. The gap must be word aligned. A
/// one-word gap (an unavoidable allocator residue) gets the header-only
/// single-word filler; a gap of exactly the minimum object size the
/// smallest-dark-matter hub; anything larger a filler array.
pub fn format(start: Address, end: Address) {
    let size = end - start;
    debug_assert!(size >= BYTES_IN_WORD, "gap of {} bytes is too small", size);
    debug_assert!(start.is_aligned_to(BYTES_IN_WORD));
    debug_assert!(conversions::raw_is_aligned(size, BYTES_IN_WORD));
    if size == BYTES_IN_WORD {
        hub::install_hub(start, &SINGLE_WORD_FILLER_HUB);
    } else if size == MIN_OBJECT_BYTES {
        hub::install_hub(start, &SMALLEST_DARK_MATTER_HUB);
    } else {
        hub::install_hub(start, &DARK_MATTER_HUB);
        hub::set_length(start, conversions::bytes_to_words(size) - 2);
    }
}

/// Is the cell at this origin dark matter (of any kind)?
pub fn is_dark_matter(cell: Address) -> bool {
    let word = hub::hub_word(cell);
    word == DARK_MATTER_HUB.word()
        || word == SMALLEST_DARK_MATTER_HUB.word()
        || word == SINGLE_WORD_FILLER_HUB.word()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{classify, size_of_cell, CellClass};
    use crate::util::memory;

    #[test]
    fn smallest_gap() {
        let base = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        format(base, base + MIN_OBJECT_BYTES);
        assert_eq!(classify(base), CellClass::SmallestDarkMatter);
        assert_eq!(size_of_cell(base), MIN_OBJECT_BYTES);
        assert!(is_dark_matter(base));
        memory::release(base, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn filler_array_gap() {
        let base = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        format(base, base + 1024usize);
        assert_eq!(classify(base), CellClass::DarkMatter);
        assert_eq!(size_of_cell(base), 1024);
        memory::release(base, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn back_to_back_gaps_walk() {
        let base = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        format(base, base + 48usize);
        format(base + 48usize, base + 64usize);
        let second = base + size_of_cell(base);
        assert_eq!(second, base + 48usize);
        assert_eq!(size_of_cell(second), MIN_OBJECT_BYTES);
        memory::release(base, BYTES_IN_REGION).unwrap();
    }
}
