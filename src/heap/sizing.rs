//! The heap-sizing policy.
//!
//! The user specifies memory `M` (`-Xmx`/`-Xms`). Because the old
//! generation is semi-spaced, only one old semi-space is usable at any
//! time, so the effective heap size is `H = M / (2 - YP)` where `YP` is the
//! young generation's share: the young generation plus both old semi-spaces
//! then add up to exactly `M`.
//!
//! The policy runs at the end of every full GC. In normal mode the young
//! share stays at its maximum and the policy grows or shrinks `M` between
//! the user bounds. When the free old space no longer covers the estimated
//! next evacuation, the policy enters degraded mode and trades young space
//! for old space, until the young generation would fall under its floor,
//! which is reported as out-of-memory.

use atomic_refcell::AtomicRefCell;
use enum_map::{Enum, EnumMap};

use crate::util::conversions;
use crate::util::options::Options;

/// The collector cannot satisfy an allocation within the user's memory
/// bounds. Surfaced to the mutator that requested the allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapOutOfMemory;

impl std::fmt::Display for HeapOutOfMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "heap out of memory")
    }
}

impl std::error::Error for HeapOutOfMemory {}

/// Events the policy logs, one line per event with its numeric arguments.
/// The textual rendering is not part of any external contract.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum, strum_macros::Display)]
pub enum HeapResizeEvent {
    ShouldPerformFullGC,
    ChangeYoungPercent,
    GrowHeap,
    ShrinkHeap,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SizingMode {
    Normal,
    Degraded,
}

/// The generation sizes the policy decided on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GenerationSizes {
    /// Effective heap size `H`.
    pub heap_size: usize,
    /// Young generation size `YP * H`.
    pub young_size: usize,
    /// Size of each old semi-space, `(1 - YP) * H`.
    pub old_semi_size: usize,
}

pub struct HeapSizingPolicy {
    /// User bounds on memory (`-Xmx` / `-Xms`).
    max_memory: usize,
    min_memory: usize,
    young_percent_max: usize,
    min_young_percent: usize,
    min_young_size: usize,
    max_free_percent: usize,
    min_delta: usize,
    alignment: usize,
    mode: SizingMode,
    /// Current memory target, between the user bounds.
    memory: usize,
    /// Current effective heap size.
    heap_size: usize,
    /// Current young generation size.
    young_size: usize,
    events: AtomicRefCell<EnumMap<HeapResizeEvent, usize>>,
}

impl HeapSizingPolicy {
    pub fn from_options(options: &Options) -> Self {
        let alignment = **options.heap_alignment;
        let max_memory = conversions::raw_align_up(**options.max_heap, alignment);
        let min_memory =
            conversions::raw_align_up((**options.min_heap).min(max_memory), alignment);
        let mut policy = HeapSizingPolicy {
            max_memory,
            min_memory,
            young_percent_max: *options.young_percent_max as usize,
            min_young_percent: *options.min_young_percent as usize,
            min_young_size: **options.min_young_size,
            max_free_percent: *options.max_free_percent as usize,
            min_delta: **options.min_heap_delta,
            alignment: **options.heap_alignment,
            mode: SizingMode::Normal,
            memory: min_memory,
            heap_size: 0,
            young_size: 0,
            events: AtomicRefCell::new(EnumMap::default()),
        };
        let (heap, young) = policy.sizes_for(min_memory, policy.young_percent_max);
        policy.heap_size = heap;
        policy.young_size = young;
        policy
    }

    /// Effective heap size and young size for a memory target and a young
    /// percent, quantized up to the configured alignment.
    fn sizes_for(&self, memory: usize, young_percent: usize) -> (usize, usize) {
        let heap = 100 * memory / (200 - young_percent);
        let young = young_percent * heap / 100;
        (self.quantize(heap), self.quantize(young))
    }

    fn quantize(&self, size: usize) -> usize {
        conversions::raw_align_up(size, self.alignment)
    }

    pub fn mode(&self) -> SizingMode {
        self.mode
    }

    pub fn current_sizes(&self) -> GenerationSizes {
        GenerationSizes {
            heap_size: self.heap_size,
            young_size: self.young_size,
            old_semi_size: self.heap_size - self.young_size,
        }
    }

    /// The young generation's current share of the effective heap.
    pub fn young_percent(&self) -> f64 {
        100.0 * self.young_size as f64 / self.heap_size as f64
    }

    /// Address space that must be reserved up front: the young generation
    /// plus both old semi-spaces never exceed the user's maximum memory.
    pub fn max_reserve(&self) -> usize {
        self.max_memory
    }

    pub fn event_count(&self, event: HeapResizeEvent) -> usize {
        self.events.borrow()[event]
    }

    fn record(&self, event: HeapResizeEvent, argument: usize) {
        info!("{} {}", event, argument);
        self.events.borrow_mut()[event] += 1;
    }

    /// Should the collection triggered by an allocation failure be a full
    /// GC rather than a young-generation evacuation? True when the free old
    /// space cannot take the estimated evacuation.
    pub fn should_perform_full_gc(
        &self,
        estimated_next_evacuation: usize,
        free_old_space: usize,
    ) -> bool {
        if free_old_space < estimated_next_evacuation {
            self.record(HeapResizeEvent::ShouldPerformFullGC, estimated_next_evacuation);
            true
        } else {
            false
        }
    }

    /// Decide generation sizes at the end of a full GC.
    pub fn resize_after_full_gc(
        &mut self,
        estimated_next_evacuation: usize,
        free_old_space: usize,
        free_heap: usize,
    ) -> Result<GenerationSizes, HeapOutOfMemory> {
        match self.mode {
            SizingMode::Normal => {
                if free_old_space < estimated_next_evacuation {
                    self.mode = SizingMode::Degraded;
                    self.degraded_resize(estimated_next_evacuation, free_old_space)?;
                } else if self.should_shrink(free_heap) {
                    let excess = free_heap - self.max_free_percent * self.heap_size / 100;
                    let delta = excess.max(self.min_delta);
                    self.memory =
                        self.quantize(self.memory.saturating_sub(delta).max(self.min_memory));
                    let (heap, young) = self.sizes_for(self.memory, self.young_percent_max);
                    self.heap_size = heap;
                    self.young_size = young;
                    self.record(HeapResizeEvent::ShrinkHeap, delta);
                } else if self.should_grow(estimated_next_evacuation, free_old_space) {
                    let wanted = 2 * estimated_next_evacuation - free_old_space;
                    let delta = wanted.max(self.min_delta);
                    self.memory = self.quantize((self.memory + delta).min(self.max_memory));
                    let (heap, young) = self.sizes_for(self.memory, self.young_percent_max);
                    self.heap_size = heap;
                    self.young_size = young;
                    self.record(HeapResizeEvent::GrowHeap, delta);
                }
            }
            SizingMode::Degraded => {
                if free_old_space < estimated_next_evacuation {
                    self.degraded_resize(estimated_next_evacuation, free_old_space)?;
                }
            }
        }
        Ok(self.current_sizes())
    }

    fn should_shrink(&self, free_heap: usize) -> bool {
        100 * free_heap > self.max_free_percent * self.heap_size
            && self.memory.saturating_sub(self.min_delta) >= self.min_memory
            && self.memory > self.min_memory
    }

    fn should_grow(&self, estimated_next_evacuation: usize, free_old_space: usize) -> bool {
        free_old_space < 2 * estimated_next_evacuation && self.memory < self.max_memory
    }

    /// Redistribute young space to the two old semi-spaces. Shrinking the
    /// young generation by `2 * delta` lets each old semi-space grow by
    /// `delta` within the same user memory.
    fn degraded_resize(
        &mut self,
        estimated_next_evacuation: usize,
        free_old_space: usize,
    ) -> Result<(), HeapOutOfMemory> {
        let needed = estimated_next_evacuation - free_old_space;
        let delta = self
            .min_delta
            .max(needed.min(self.young_size / 4));
        let young_floor = self
            .min_young_size
            .max(self.min_young_percent * self.max_effective_heap() / 100);
        let new_young = self.young_size.saturating_sub(2 * delta);
        if new_young < young_floor {
            return Err(HeapOutOfMemory);
        }
        self.heap_size = self.quantize(self.heap_size - delta);
        self.young_size = self.quantize(new_young);
        self.record(HeapResizeEvent::ChangeYoungPercent, self.young_percent() as usize);
        Ok(())
    }

    /// The effective heap size at maximum memory and maximum young share.
    fn max_effective_heap(&self) -> usize {
        100 * self.max_memory / (200 - self.young_percent_max)
    }
}
