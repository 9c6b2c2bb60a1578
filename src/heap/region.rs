//! The region descriptor table.
//!
//! The heap is a contiguous run of fixed, power-of-two sized regions. A
//! region's id is its index in the table; its address is derived
//! arithmetically from the heap base. Descriptors are held by value in one
//! array, and a zero-filled descriptor denotes a free, iterable region
//! belonging to no account, so the table needs no explicit initialization.

use crate::util::constants::*;
use crate::util::conversions;
use crate::util::Address;

/// Index of a region in the region table.
pub type RegionId = usize;

/// The heap account a region belongs to. A zero descriptor belongs to no
/// account.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum HeapAccount {
    #[default]
    None = 0,
    Young,
    Old,
    Boot,
    Immortal,
}

/// An open allocation (a mutator TLAB or an evacuator LAB) is parked in the
/// region: its memory cannot be parsed cell by cell.
const IS_ALLOCATING: u8 = 1;
/// The region's free space is threaded on its free-chunk list; the
/// `first_free_chunk` word index is meaningful.
const HAS_FREE_CHUNK: u8 = 1 << 1;
/// The region is part of a multi-region cell.
const IS_LARGE: u8 = 1 << 2;
/// First region of a multi-region cell. Implies `IS_LARGE`.
const IS_HEAD: u8 = 1 << 3;
/// Last region of a multi-region cell. Implies `IS_LARGE`.
const IS_TAIL: u8 = 1 << 4;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionDescriptor {
    flags: u8,
    /// Word index, relative to the region start, of the first free chunk.
    /// Only meaningful when `HAS_FREE_CHUNK` is set (a wholly free region's
    /// chunk legitimately starts at word 0).
    first_free_chunk: u32,
    num_free_chunks: u32,
    free_words: u32,
    live_words: u32,
    owner: HeapAccount,
}

impl RegionDescriptor {
    pub fn owner(&self) -> HeapAccount {
        self.owner
    }

    pub fn set_owner(&mut self, owner: HeapAccount) {
        self.owner = owner;
    }

    /// Can the region be parsed from its start, cell by cell, to its end?
    /// A zero descriptor is iterable; allocation in progress and the body
    /// regions of a multi-region cell are not.
    pub fn is_iterable(&self) -> bool {
        !self.is_allocating() && !(self.is_large() && !self.is_head())
    }

    pub fn is_allocating(&self) -> bool {
        self.flags & IS_ALLOCATING != 0
    }

    pub fn set_allocating(&mut self, allocating: bool) {
        if allocating {
            self.flags |= IS_ALLOCATING;
        } else {
            self.flags &= !IS_ALLOCATING;
        }
    }

    pub fn has_free_chunk(&self) -> bool {
        self.flags & HAS_FREE_CHUNK != 0
    }

    pub fn is_large(&self) -> bool {
        self.flags & IS_LARGE != 0
    }

    pub fn is_head(&self) -> bool {
        self.flags & IS_HEAD != 0
    }

    pub fn is_tail(&self) -> bool {
        self.flags & IS_TAIL != 0
    }

    pub fn set_large(&mut self, head: bool, tail: bool) {
        self.flags |= IS_LARGE;
        if head {
            self.flags |= IS_HEAD;
        }
        if tail {
            self.flags |= IS_TAIL;
        }
    }

    /// Word index of the first free chunk, if the region has one.
    pub fn first_free_chunk(&self) -> Option<usize> {
        if self.has_free_chunk() {
            Some(self.first_free_chunk as usize)
        } else {
            None
        }
    }

    pub fn set_first_free_chunk(&mut self, word_index: Option<usize>) {
        match word_index {
            Some(index) => {
                debug_assert!(index < WORDS_IN_REGION);
                self.flags |= HAS_FREE_CHUNK;
                self.first_free_chunk = index as u32;
            }
            None => {
                self.flags &= !HAS_FREE_CHUNK;
                self.first_free_chunk = 0;
            }
        }
    }

    pub fn num_free_chunks(&self) -> usize {
        self.num_free_chunks as usize
    }

    pub fn set_num_free_chunks(&mut self, n: usize) {
        self.num_free_chunks = n as u32;
    }

    pub fn free_words(&self) -> usize {
        self.free_words as usize
    }

    pub fn set_free_words(&mut self, words: usize) {
        debug_assert!(words <= WORDS_IN_REGION);
        self.free_words = words as u32;
    }

    pub fn live_words(&self) -> usize {
        self.live_words as usize
    }

    pub fn set_live_words(&mut self, words: usize) {
        debug_assert!(words <= WORDS_IN_REGION);
        self.live_words = words as u32;
    }

    pub fn add_live_words(&mut self, words: usize) {
        self.live_words += words as u32;
    }

    /// Words that are neither free nor live: formatted gaps a walker steps
    /// over but the allocators cannot reuse.
    pub fn dark_matter_words(&self) -> usize {
        WORDS_IN_REGION - self.free_words() - self.live_words()
    }

    fn validate(&self) {
        debug_assert!(self.free_words() + self.live_words() <= WORDS_IN_REGION);
        if self.is_head() || self.is_tail() {
            debug_assert!(self.is_large());
        }
    }
}

pub struct RegionTable {
    base: Address,
    descriptors: Box<[RegionDescriptor]>,
}

impl RegionTable {
    /// Create the table for `count` regions starting at `base`. Regions are
    /// created here once, at boot; only their descriptors change afterwards.
    pub fn new(base: Address, count: usize) -> Self {
        assert!(conversions::is_region_aligned(base));
        RegionTable {
            base,
            descriptors: vec![RegionDescriptor::default(); count].into_boxed_slice(),
        }
    }

    pub fn base(&self) -> Address {
        self.base
    }

    pub fn region_count(&self) -> usize {
        self.descriptors.len()
    }

    pub fn heap_end(&self) -> Address {
        self.base + (self.region_count() << LOG_BYTES_IN_REGION)
    }

    pub fn region_start(&self, id: RegionId) -> Address {
        debug_assert!(id < self.region_count());
        self.base + (id << LOG_BYTES_IN_REGION)
    }

    pub fn region_end(&self, id: RegionId) -> Address {
        self.region_start(id) + BYTES_IN_REGION
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.heap_end()
    }

    pub fn id_of(&self, addr: Address) -> RegionId {
        debug_assert!(self.contains(addr));
        (addr - self.base) >> LOG_BYTES_IN_REGION
    }

    pub fn descriptor(&self, id: RegionId) -> &RegionDescriptor {
        &self.descriptors[id]
    }

    pub fn descriptor_mut(&mut self, id: RegionId) -> &mut RegionDescriptor {
        &mut self.descriptors[id]
    }

    /// Return a region to its boot state: free, iterable, unowned.
    pub fn reset(&mut self, id: RegionId) {
        self.descriptors[id] = RegionDescriptor::default();
    }

    pub fn iter_owned(&self, owner: HeapAccount) -> impl Iterator<Item = RegionId> + '_ {
        self.descriptors
            .iter()
            .enumerate()
            .filter(move |(_, d)| d.owner() == owner)
            .map(|(id, _)| id)
    }

    /// The lowest-numbered unowned region, if any.
    pub fn find_free(&self) -> Option<RegionId> {
        self.iter_owned(HeapAccount::None).next()
    }

    /// The lowest-numbered run of `count` contiguous unowned regions.
    pub fn find_free_run(&self, count: usize) -> Option<RegionId> {
        let mut run_start = 0;
        let mut run_len = 0;
        for id in 0..self.region_count() {
            if self.descriptors[id].owner() == HeapAccount::None {
                if run_len == 0 {
                    run_start = id;
                }
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            } else {
                run_len = 0;
            }
        }
        None
    }

    pub fn validate(&self, id: RegionId) {
        self.descriptors[id].validate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RegionTable {
        let base = unsafe { Address::from_usize(0x4000_0000) };
        RegionTable::new(base, 8)
    }

    #[test]
    fn zero_descriptor_is_free_and_iterable() {
        let t = table();
        let d = t.descriptor(3);
        assert_eq!(d.owner(), HeapAccount::None);
        assert!(d.is_iterable());
        assert!(!d.has_free_chunk());
        assert_eq!(d.free_words(), 0);
        assert_eq!(d.live_words(), 0);
    }

    #[test]
    fn address_arithmetic() {
        let t = table();
        assert_eq!(t.region_start(0), t.base());
        assert_eq!(t.region_start(2), t.base() + 2 * BYTES_IN_REGION);
        assert_eq!(t.id_of(t.base() + 2 * BYTES_IN_REGION + 17usize), 2);
        assert!(t.contains(t.base()));
        assert!(!t.contains(t.heap_end()));
    }

    #[test]
    fn ownership_and_reset() {
        let mut t = table();
        t.descriptor_mut(1).set_owner(HeapAccount::Young);
        t.descriptor_mut(5).set_owner(HeapAccount::Young);
        let young: Vec<RegionId> = t.iter_owned(HeapAccount::Young).collect();
        assert_eq!(young, vec![1, 5]);
        t.reset(1);
        assert_eq!(t.descriptor(1).owner(), HeapAccount::None);
        assert_eq!(t.find_free(), Some(0));
    }

    #[test]
    fn free_chunk_index_zero_is_valid_when_flagged() {
        let mut t = table();
        let d = t.descriptor_mut(0);
        assert_eq!(d.first_free_chunk(), None);
        d.set_first_free_chunk(Some(0));
        assert_eq!(d.first_free_chunk(), Some(0));
        d.set_first_free_chunk(None);
        assert_eq!(d.first_free_chunk(), None);
    }

    #[test]
    fn large_flags_imply_large() {
        let mut t = table();
        t.descriptor_mut(2).set_large(true, false);
        t.descriptor_mut(3).set_large(false, false);
        t.descriptor_mut(4).set_large(false, true);
        assert!(t.descriptor(2).is_iterable());
        assert!(!t.descriptor(3).is_iterable());
        assert!(!t.descriptor(4).is_iterable());
        t.validate(2);
        t.validate(3);
        t.validate(4);
    }

    #[test]
    fn find_free_run_skips_owned_gaps() {
        let mut t = table();
        t.descriptor_mut(1).set_owner(HeapAccount::Old);
        assert_eq!(t.find_free_run(3), Some(2));
        t.descriptor_mut(3).set_owner(HeapAccount::Old);
        assert_eq!(t.find_free_run(3), Some(4));
    }
}
