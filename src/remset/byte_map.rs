//! A generic map from a covered address range to one byte per
//! `2^k`-aligned unit of the range.
//!
//! The table keeps a biased base pointer
//! `biased_base = storage - (covered_start >> k)` so that the entry for an
//! address is `biased_base[addr >> k]`, with no subtraction of the covered
//! start on the fast path. This is what lets a generated write barrier be a
//! shift and a byte-immediate store.

use atomic::Ordering;
use std::sync::atomic::AtomicU8;

use crate::util::conversions;
use crate::util::Address;

/// Entry bytes are stored as relaxed atomics: mutator write barriers store
/// into the table concurrently with each other (idempotently), while all
/// non-barrier mutation happens inside safepoints.
pub struct Log2ByteMap {
    log2_unit: usize,
    covered_start: Address,
    covered_end: Address,
    table: Box<[AtomicU8]>,
    /// `table address - (covered_start >> log2_unit)`, as a plain integer.
    biased_base: usize,
}

// The table is plain bytes behind atomic accesses.
unsafe impl Send for Log2ByteMap {}
unsafe impl Sync for Log2ByteMap {}

impl Log2ByteMap {
    /// Create a byte map covering `[covered_start, covered_start + covered_size)`
    /// with one entry per `1 << log2_unit` bytes, filled with `initial`.
    /// Both ends of the covered range must be unit aligned.
    pub fn new(
        covered_start: Address,
        covered_size: usize,
        log2_unit: usize,
        initial: u8,
    ) -> Self {
        let unit = 1 << log2_unit;
        assert!(covered_start.is_aligned_to(unit));
        assert!(conversions::raw_is_aligned(covered_size, unit));
        let len = covered_size >> log2_unit;
        let mut storage = Vec::with_capacity(len);
        storage.resize_with(len, || AtomicU8::new(initial));
        let table: Box<[AtomicU8]> = storage.into_boxed_slice();
        let biased_base =
            (table.as_ptr() as usize).wrapping_sub(covered_start.as_usize() >> log2_unit);
        Log2ByteMap {
            log2_unit,
            covered_start,
            covered_end: covered_start + covered_size,
            table,
            biased_base,
        }
    }

    pub fn covered_start(&self) -> Address {
        self.covered_start
    }

    pub fn covered_end(&self) -> Address {
        self.covered_end
    }

    /// Number of entries in the table.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The biased base, published so that generated barrier code can embed
    /// it as an absolute address literal.
    pub fn biased_base(&self) -> usize {
        self.biased_base
    }

    /// Is the address inside the covered range?
    pub fn is_covered(&self, addr: Address) -> bool {
        addr >= self.covered_start && addr < self.covered_end
    }

    /// Index of the entry covering the address.
    pub fn entry_index(&self, addr: Address) -> usize {
        debug_assert!(self.is_covered(addr), "address {} is not covered", addr);
        (addr - self.covered_start) >> self.log2_unit
    }

    /// First address of the unit covered by the entry.
    pub fn range_start(&self, index: usize) -> Address {
        debug_assert!(index <= self.len());
        self.covered_start + (index << self.log2_unit)
    }

    pub fn get(&self, index: usize) -> u8 {
        self.table[index].load(Ordering::Relaxed)
    }

    pub fn set(&self, index: usize, value: u8) {
        self.table[index].store(value, Ordering::Relaxed);
    }

    /// Biased fast path: read the entry for an address without translating
    /// through the covered start.
    ///
    /// # Safety
    /// Undefined for addresses outside the covered range; debug builds
    /// assert covering.
    pub unsafe fn unsafe_get(&self, addr: Address) -> u8 {
        debug_assert!(self.is_covered(addr), "address {} is not covered", addr);
        let entry = self
            .biased_base
            .wrapping_add(addr.as_usize() >> self.log2_unit) as *const AtomicU8;
        (*entry).load(Ordering::Relaxed)
    }

    /// Biased fast path: write the entry for an address. This is the shape
    /// of the write barrier.
    ///
    /// # Safety
    /// Undefined for addresses outside the covered range; debug builds
    /// assert covering.
    pub unsafe fn unsafe_set(&self, addr: Address, value: u8) {
        debug_assert!(self.is_covered(addr), "address {} is not covered", addr);
        let entry = self
            .biased_base
            .wrapping_add(addr.as_usize() >> self.log2_unit) as *const AtomicU8;
        (*entry).store(value, Ordering::Relaxed);
    }

    /// Fill the whole table with a value.
    pub fn fill(&self, value: u8) {
        self.fill_range(0, self.len(), value);
    }

    /// Fill entries `[lo, hi)` with a value.
    pub fn fill_range(&self, lo: usize, hi: usize, value: u8) {
        debug_assert!(lo <= hi && hi <= self.len());
        // Bulk fills only happen inside safepoints, where no barrier races
        // with the table.
        unsafe {
            std::ptr::write_bytes(
                (self.table.as_ptr() as *mut u8).add(lo),
                value,
                hi - lo,
            );
        }
    }

    /// Index of the first entry in `[lo, hi)` equal to `value`, or `hi` if
    /// the range holds no such entry. Callers iterating runs rely on `hi`
    /// being returned for a uniform range.
    pub fn first(&self, lo: usize, hi: usize, value: u8) -> usize {
        debug_assert!(lo <= hi && hi <= self.len());
        for i in lo..hi {
            if self.get(i) == value {
                return i;
            }
        }
        hi
    }

    /// Index of the first entry in `[lo, hi)` not equal to `value`, or `hi`
    /// if the range is uniformly `value`.
    pub fn first_not(&self, lo: usize, hi: usize, value: u8) -> usize {
        debug_assert!(lo <= hi && hi <= self.len());
        for i in lo..hi {
            if self.get(i) != value {
                return i;
            }
        }
        hi
    }
}
