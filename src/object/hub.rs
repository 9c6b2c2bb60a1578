use crate::object::forwarding;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::conversions::words_to_bytes;
use crate::util::Address;

/// Word index of the hub slot within a cell. The hub is always the first
/// word, and it is the slot the evacuator forwards before any other.
pub const HUB_WORD_INDEX: usize = 0;
/// Word index of the length slot of hybrids, reference arrays and dark
/// matter fillers.
pub const LENGTH_WORD_INDEX: usize = 1;

/// The shape of a live cell, as described by its hub. Dispatch over cell
/// layouts is a single small match on this tag; there is no inheritance
/// among layout kinds.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellLayout {
    /// A fixed-size cell. `words` includes the hub word.
    Tuple { words: usize },
    /// A cell with a fixed header followed by a variable word part that
    /// holds no references. `header_words` includes the hub and length
    /// words; the length word counts the words of the variable part.
    Hybrid { header_words: usize },
    /// A length-prefixed array whose elements are all references.
    RefArray,
    /// A length-prefixed array of non-reference filler words. Only the dark
    /// matter hub uses this layout.
    WordArray,
}

/// A hub describes the layout of the cells that carry its address in their
/// hub word: where the reference slots are, and how to compute the cell
/// size. Hubs live outside the collected heap (the embedder owns them for
/// the lifetime of the heap), so a hub word never points into from-space.
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub struct Hub {
    pub layout: CellLayout,
    /// Word indices of the reference slots in the fixed part of the cell.
    pub ref_offsets: &'static [usize],
    /// Word index of the special-reference referent slot, if the cells of
    /// this hub are special references (soft/weak/phantom).
    pub special_referent: Option<usize>,
}

impl Hub {
    pub const fn new_tuple(words: usize, ref_offsets: &'static [usize]) -> Hub {
        Hub {
            layout: CellLayout::Tuple { words },
            ref_offsets,
            special_referent: None,
        }
    }

    pub const fn new_hybrid(header_words: usize, ref_offsets: &'static [usize]) -> Hub {
        Hub {
            layout: CellLayout::Hybrid { header_words },
            ref_offsets,
            special_referent: None,
        }
    }

    pub const fn new_ref_array() -> Hub {
        Hub {
            layout: CellLayout::RefArray,
            ref_offsets: &[],
            special_referent: None,
        }
    }

    /// A special-reference tuple: `referent` is the word index of the
    /// referent slot, which is not part of `ref_offsets`.
    pub const fn new_special(words: usize, ref_offsets: &'static [usize], referent: usize) -> Hub {
        Hub {
            layout: CellLayout::Tuple { words },
            ref_offsets,
            special_referent: Some(referent),
        }
    }

    /// The value a cell's hub word holds for this hub.
    pub fn word(&'static self) -> usize {
        let addr = Address::from_ref(self).as_usize();
        debug_assert!(conversions::raw_is_aligned(addr, BYTES_IN_WORD));
        addr
    }

    /// Is this cell a special reference whose referent slot needs the
    /// evacuator's attention?
    pub fn is_special_reference(&self) -> bool {
        self.special_referent.is_some()
    }
}

/// The hub of a free chunk. A walker that sees this sentinel at a cell
/// origin skips the number of bytes recorded in the chunk header.
pub static FREE_CHUNK_HUB: Hub = Hub {
    layout: CellLayout::WordArray,
    ref_offsets: &[],
    special_referent: None,
};

/// The hub of a dark matter filler: an unreclaimable gap formatted as a
/// self-describing word array so that a heap walk can step over it.
pub static DARK_MATTER_HUB: Hub = Hub {
    layout: CellLayout::WordArray,
    ref_offsets: &[],
    special_referent: None,
};

/// The hub of the smallest dark matter cell: a gap of exactly the minimum
/// object size, too small to carry a length word.
pub static SMALLEST_DARK_MATTER_HUB: Hub = Hub {
    layout: CellLayout::Tuple {
        words: MIN_OBJECT_WORDS,
    },
    ref_offsets: &[],
    special_referent: None,
};

/// The hub of a one-word filler: the residue an allocator cannot avoid when
/// a carved chunk is one word larger than the cell placed in it. The hub
/// word alone describes the cell.
pub static SINGLE_WORD_FILLER_HUB: Hub = Hub {
    layout: CellLayout::Tuple { words: 1 },
    ref_offsets: &[],
    special_referent: None,
};

/// What a heap walker finds at a cell origin.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CellClass {
    /// A live object laid out by the given hub.
    Live(&'static Hub),
    /// A free chunk; its size is in the chunk header.
    FreeChunk,
    /// A dark matter filler with a length word.
    DarkMatter,
    /// A dark matter filler of exactly the minimum object size.
    SmallestDarkMatter,
    /// A one-word allocator residue.
    SingleWordFiller,
}

/// Read a cell's raw hub word.
///
/// The cell must not be forwarded; forwarded cells are only ever reached
/// through [`crate::object::forwarding::forwarded`].
pub fn hub_word(cell: Address) -> usize {
    debug_assert!(!cell.is_zero());
    let word: usize = unsafe { cell.load() };
    debug_assert!(
        !forwarding::word_is_forwarding(word),
        "cell {} is forwarded, hub word {:#x}",
        cell,
        word
    );
    word
}

/// Install a hub in a cell's hub word.
pub fn install_hub(cell: Address, hub: &'static Hub) {
    unsafe { cell.store(hub.word()) };
}

/// Read the length word of a hybrid, reference array or dark matter cell.
pub fn length_of(cell: Address) -> usize {
    unsafe { (cell + words_to_bytes(LENGTH_WORD_INDEX)).load() }
}

/// Write the length word of a hybrid, reference array or dark matter cell.
pub fn set_length(cell: Address, length: usize) {
    unsafe { (cell + words_to_bytes(LENGTH_WORD_INDEX)).store(length) };
}

/// Classify the cell at the given origin by its hub word.
pub fn classify(cell: Address) -> CellClass {
    let word = hub_word(cell);
    if word == FREE_CHUNK_HUB.word() {
        CellClass::FreeChunk
    } else if word == DARK_MATTER_HUB.word() {
        CellClass::DarkMatter
    } else if word == SMALLEST_DARK_MATTER_HUB.word() {
        CellClass::SmallestDarkMatter
    } else if word == SINGLE_WORD_FILLER_HUB.word() {
        CellClass::SingleWordFiller
    } else {
        CellClass::Live(unsafe { Address::from_usize(word).as_ref() })
    }
}

/// Total size in bytes of the cell at the given origin, for any walkable
/// cell: live object, free chunk or dark matter.
pub fn size_of_cell(cell: Address) -> usize {
    match classify(cell) {
        CellClass::Live(hub) => match hub.layout {
            CellLayout::Tuple { words } => words_to_bytes(words),
            CellLayout::Hybrid { header_words } => {
                words_to_bytes(header_words + length_of(cell))
            }
            CellLayout::RefArray | CellLayout::WordArray => {
                words_to_bytes(LENGTH_WORD_INDEX + 1 + length_of(cell))
            }
        },
        CellClass::FreeChunk => crate::heap::free_chunk::size(cell),
        CellClass::DarkMatter => words_to_bytes(LENGTH_WORD_INDEX + 1 + length_of(cell)),
        CellClass::SmallestDarkMatter => MIN_OBJECT_BYTES,
        CellClass::SingleWordFiller => BYTES_IN_WORD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::memory;

    static PAIR_HUB: Hub = Hub::new_tuple(3, &[1, 2]);

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(FREE_CHUNK_HUB.word(), DARK_MATTER_HUB.word());
        assert_ne!(FREE_CHUNK_HUB.word(), SMALLEST_DARK_MATTER_HUB.word());
        assert_ne!(DARK_MATTER_HUB.word(), SMALLEST_DARK_MATTER_HUB.word());
    }

    #[test]
    fn tuple_size_and_class() {
        let start = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        install_hub(start, &PAIR_HUB);
        assert_eq!(classify(start), CellClass::Live(&PAIR_HUB));
        assert_eq!(size_of_cell(start), 3 * BYTES_IN_WORD);
        memory::release(start, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn ref_array_size_from_length() {
        static ARRAY_HUB: Hub = Hub::new_ref_array();
        let start = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        install_hub(start, &ARRAY_HUB);
        set_length(start, 5);
        assert_eq!(size_of_cell(start), (2 + 5) * BYTES_IN_WORD);
        memory::release(start, BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn classify_live_returns_same_hub() {
        let start = memory::reserve_aligned(BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        install_hub(start, &PAIR_HUB);
        match classify(start) {
            CellClass::Live(hub) => assert!(std::ptr::eq(hub, &PAIR_HUB)),
            other => panic!("unexpected class {:?}", other),
        }
        memory::release(start, BYTES_IN_REGION).unwrap();
    }
}
