/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a gigabyte
pub const LOG_BYTES_IN_GBYTE: u8 = 30;
/// The number of bytes in a gigabyte
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// log2 of the number of bytes in a card. Cards are the granularity of the
/// remembered set: one byte of card table and one byte of first-object table
/// cover this many bytes of heap.
pub const LOG_BYTES_IN_CARD: usize = 9;
/// The number of bytes in a card
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;
/// The number of words in a card
pub const WORDS_IN_CARD: usize = BYTES_IN_CARD >> LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a heap region
pub const LOG_BYTES_IN_REGION: usize = 20;
/// The number of bytes in a heap region
pub const BYTES_IN_REGION: usize = 1 << LOG_BYTES_IN_REGION;
/// The number of words in a heap region
pub const WORDS_IN_REGION: usize = BYTES_IN_REGION >> LOG_BYTES_IN_WORD;
/// The number of cards in a heap region
pub const CARDS_IN_REGION: usize = BYTES_IN_REGION >> LOG_BYTES_IN_CARD;

/// log2 of the minimal cell size in bytes: a hub word plus one payload word.
pub const LOG_MIN_OBJECT_BYTES: u8 = LOG_BYTES_IN_WORD + 1;
/// The minimal cell size in bytes
pub const MIN_OBJECT_BYTES: usize = 1 << LOG_MIN_OBJECT_BYTES;
/// The minimal cell size in words
pub const MIN_OBJECT_WORDS: usize = MIN_OBJECT_BYTES >> LOG_BYTES_IN_WORD;

/// Space reserved at the tail of every promotion LAB so that a dead-object
/// filler can always be planted.
pub const LAB_HEADROOM: usize = MIN_OBJECT_BYTES;

// Regions must hold a whole number of cards, and cards a whole number of words.
const_assert!(LOG_BYTES_IN_REGION > LOG_BYTES_IN_CARD);
const_assert!(LOG_BYTES_IN_CARD > LOG_BYTES_IN_WORD as usize);
const_assert_eq!(CARDS_IN_REGION * BYTES_IN_CARD, BYTES_IN_REGION);
