//! The region allocator: hands out TLAB- and LAB-sized chunks from the
//! free-chunk lists of a space's regions.
//!
//! A space is an account plus an explicit member-region list; the two old
//! semi-spaces share the `Old` account but never each other's regions.
//! Both the mutator's TLAB refills and the evacuator's promotion-LAB
//! refills go through this path. Splitting a chunk notifies the dead-space
//! listener so the first-object table keeps resolving every card of the
//! remainder to the remainder's new origin.

use crate::heap::free_chunk;
use crate::heap::region::{HeapAccount, RegionId, RegionTable};
use crate::remset::DeadSpaceListener;
use crate::util::constants::*;
use crate::util::conversions;
use crate::util::memory;
use crate::util::Address;

pub struct ChunkAllocator {
    account: HeapAccount,
    members: Vec<RegionId>,
    /// Round-robin position in `members`, so consecutive refills drain one
    /// region before touching the next.
    cursor: usize,
}

impl ChunkAllocator {
    pub fn new(account: HeapAccount) -> Self {
        ChunkAllocator {
            account,
            members: vec![],
            cursor: 0,
        }
    }

    pub fn account(&self) -> HeapAccount {
        self.account
    }

    pub fn members(&self) -> &[RegionId] {
        &self.members
    }

    /// Remove and return every member region; the caller resets their
    /// descriptors.
    pub fn take_members(&mut self) -> Vec<RegionId> {
        self.cursor = 0;
        std::mem::take(&mut self.members)
    }

    /// Claim an unowned region for this space and format it as a single
    /// free chunk.
    pub fn claim_region(
        &mut self,
        regions: &mut RegionTable,
        listener: &mut dyn DeadSpaceListener,
        id: RegionId,
    ) {
        let start = regions.region_start(id);
        // The listener may pin the region's last card as dark matter so its
        // first-object entry stays stable while allocation carves from the
        // chunk head; only the space up to the returned limit is chunkable.
        let chunk_end = listener.notify_coalescing(start, BYTES_IN_REGION);
        free_chunk::format(start, chunk_end - start, Address::ZERO);
        let descriptor = regions.descriptor_mut(id);
        debug_assert_eq!(descriptor.owner(), HeapAccount::None);
        descriptor.set_owner(self.account);
        descriptor.set_free_words(conversions::bytes_to_words(chunk_end - start));
        descriptor.set_live_words(0);
        descriptor.set_first_free_chunk(Some(0));
        descriptor.set_num_free_chunks(1);
        self.members.push(id);
    }

    /// Adopt a region that already belongs to this space's account, e.g.
    /// after a sweep rebuilt its free list.
    pub fn adopt_region(&mut self, regions: &RegionTable, id: RegionId) {
        debug_assert_eq!(regions.descriptor(id).owner(), self.account);
        debug_assert!(!self.members.contains(&id));
        self.members.push(id);
    }

    /// Total free bytes on the space's chunk lists.
    pub fn free_bytes(&self, regions: &RegionTable) -> usize {
        self.members
            .iter()
            .map(|&id| conversions::words_to_bytes(regions.descriptor(id).free_words()))
            .sum()
    }

    /// Total live bytes in the space.
    pub fn live_bytes(&self, regions: &RegionTable) -> usize {
        self.members
            .iter()
            .map(|&id| conversions::words_to_bytes(regions.descriptor(id).live_words()))
            .sum()
    }

    /// Hand out a chunk of at least `min_size` bytes, preferably
    /// `preferred` bytes, carved from the space's free chunks. Returns the
    /// chunk origin and its granted size, or `None` when no member region
    /// can satisfy the request. The granted memory is zeroed.
    pub fn allocate_chunk(
        &mut self,
        regions: &mut RegionTable,
        listener: &mut dyn DeadSpaceListener,
        min_size: usize,
        preferred: usize,
    ) -> Option<(Address, usize)> {
        debug_assert!(min_size <= preferred);
        debug_assert!(conversions::raw_is_aligned(min_size, BYTES_IN_WORD));
        if self.members.is_empty() {
            return None;
        }
        for position in 0..self.members.len() {
            let index = (self.cursor + position) % self.members.len();
            let id = self.members[index];
            if !regions.descriptor(id).has_free_chunk() {
                continue;
            }
            if let Some(grant) = self.carve_from_region(regions, listener, id, min_size, preferred)
            {
                self.cursor = index;
                return Some(grant);
            }
        }
        None
    }

    /// First-fit over one region's chunk list.
    fn carve_from_region(
        &mut self,
        regions: &mut RegionTable,
        listener: &mut dyn DeadSpaceListener,
        id: RegionId,
        min_size: usize,
        preferred: usize,
    ) -> Option<(Address, usize)> {
        let region_start = regions.region_start(id);
        let first_index = regions.descriptor(id).first_free_chunk()?;
        let mut prev = Address::ZERO;
        let mut chunk = region_start + conversions::words_to_bytes(first_index);
        loop {
            let chunk_size = free_chunk::size(chunk);
            if chunk_size >= min_size {
                let granted = self.take_from_chunk(
                    regions, listener, id, prev, chunk, chunk_size, preferred,
                );
                return Some((chunk, granted));
            }
            let next = free_chunk::next(chunk);
            if next.is_zero() {
                return None;
            }
            prev = chunk;
            chunk = next;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn take_from_chunk(
        &mut self,
        regions: &mut RegionTable,
        listener: &mut dyn DeadSpaceListener,
        id: RegionId,
        prev: Address,
        chunk: Address,
        chunk_size: usize,
        preferred: usize,
    ) -> usize {
        let region_start = regions.region_start(id);
        let mut granted = preferred.min(chunk_size);
        // Never leave a remainder too small to format as a chunk.
        if chunk_size - granted < free_chunk::MIN_CHUNK_BYTES {
            granted = chunk_size;
        }
        let next = free_chunk::next(chunk);
        let replacement = if granted < chunk_size {
            let remainder = chunk + granted;
            free_chunk::format(remainder, chunk_size - granted, next);
            listener.notify_split(chunk, chunk + chunk_size, granted);
            remainder
        } else {
            next
        };
        let descriptor = regions.descriptor_mut(id);
        if prev.is_zero() {
            if replacement.is_zero() {
                descriptor.set_first_free_chunk(None);
            } else {
                descriptor.set_first_free_chunk(Some(conversions::bytes_to_words(
                    replacement - region_start,
                )));
            }
        } else {
            free_chunk::set_next(prev, replacement);
        }
        if granted == chunk_size {
            descriptor.set_num_free_chunks(descriptor.num_free_chunks() - 1);
        }
        let granted_words = conversions::bytes_to_words(granted);
        descriptor.set_free_words(descriptor.free_words() - granted_words);
        descriptor.add_live_words(granted_words);
        memory::zero(chunk, granted);
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remset::NullDeadSpaceListener;
    use crate::util::memory;

    fn setup() -> (RegionTable, ChunkAllocator, Address) {
        let base = memory::reserve_aligned(4 * BYTES_IN_REGION, BYTES_IN_REGION).unwrap();
        let regions = RegionTable::new(base, 4);
        let alloc = ChunkAllocator::new(HeapAccount::Old);
        (regions, alloc, base)
    }

    #[test]
    fn claim_formats_one_chunk() {
        let (mut regions, mut alloc, base) = setup();
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        let d = regions.descriptor(0);
        assert_eq!(d.owner(), HeapAccount::Old);
        assert_eq!(d.free_words(), WORDS_IN_REGION);
        assert_eq!(d.first_free_chunk(), Some(0));
        assert_eq!(d.num_free_chunks(), 1);
        assert!(free_chunk::is_free_chunk(base));
        assert_eq!(free_chunk::size(base), BYTES_IN_REGION);
        assert_eq!(alloc.members(), &[0]);
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn carving_splits_and_accounts() {
        let (mut regions, mut alloc, base) = setup();
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        let (chunk, granted) = alloc
            .allocate_chunk(&mut regions, &mut NullDeadSpaceListener, 4096, 4096)
            .unwrap();
        assert_eq!(chunk, base);
        assert_eq!(granted, 4096);
        let d = regions.descriptor(0);
        assert_eq!(d.free_words(), WORDS_IN_REGION - 4096 / BYTES_IN_WORD);
        assert_eq!(d.live_words(), 4096 / BYTES_IN_WORD);
        assert_eq!(d.num_free_chunks(), 1);
        // The remainder chunk follows the carved space.
        let remainder = base + 4096usize;
        assert!(free_chunk::is_free_chunk(remainder));
        assert_eq!(free_chunk::size(remainder), BYTES_IN_REGION - 4096);
        assert_eq!(d.first_free_chunk(), Some(4096 / BYTES_IN_WORD));
        // The carved space was zeroed.
        assert_eq!(unsafe { chunk.load::<usize>() }, 0);
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn whole_chunk_granted_when_remainder_too_small() {
        let (mut regions, mut alloc, base) = setup();
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        let (_, granted) = alloc
            .allocate_chunk(
                &mut regions,
                &mut NullDeadSpaceListener,
                BYTES_IN_REGION - BYTES_IN_WORD,
                BYTES_IN_REGION - BYTES_IN_WORD,
            )
            .unwrap();
        assert_eq!(granted, BYTES_IN_REGION);
        let d = regions.descriptor(0);
        assert_eq!(d.free_words(), 0);
        assert!(!d.has_free_chunk());
        assert_eq!(d.num_free_chunks(), 0);
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn drains_one_region_before_the_next() {
        let (mut regions, mut alloc, base) = setup();
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 1);
        let half = BYTES_IN_REGION / 2;
        let (first, _) = alloc
            .allocate_chunk(&mut regions, &mut NullDeadSpaceListener, half, half)
            .unwrap();
        let (second, _) = alloc
            .allocate_chunk(&mut regions, &mut NullDeadSpaceListener, half, half)
            .unwrap();
        assert_eq!(first, base);
        assert_eq!(second, base + half);
        // Third request exceeds what region 0 has left.
        let (third, _) = alloc
            .allocate_chunk(
                &mut regions,
                &mut NullDeadSpaceListener,
                half + 4096,
                half + 4096,
            )
            .unwrap();
        assert_eq!(third, base + BYTES_IN_REGION);
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn exhaustion_returns_none() {
        let (mut regions, mut alloc, base) = setup();
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        assert!(alloc
            .allocate_chunk(
                &mut regions,
                &mut NullDeadSpaceListener,
                2 * BYTES_IN_REGION,
                2 * BYTES_IN_REGION
            )
            .is_none());
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }

    #[test]
    fn semi_spaces_do_not_share_regions() {
        let (mut regions, mut alloc, base) = setup();
        let mut other = ChunkAllocator::new(HeapAccount::Old);
        alloc.claim_region(&mut regions, &mut NullDeadSpaceListener, 0);
        other.claim_region(&mut regions, &mut NullDeadSpaceListener, 1);
        // Exhaust this space; the other semi-space's region is off limits.
        let _ = alloc
            .allocate_chunk(
                &mut regions,
                &mut NullDeadSpaceListener,
                BYTES_IN_REGION,
                BYTES_IN_REGION,
            )
            .unwrap();
        assert!(alloc
            .allocate_chunk(&mut regions, &mut NullDeadSpaceListener, 4096, 4096)
            .is_none());
        memory::release(base, 4 * BYTES_IN_REGION).unwrap();
    }
}
