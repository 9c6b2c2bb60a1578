//! gengc is a stop-the-world generational, region-based tracing garbage
//! collector. A non-aging young generation is evacuated into a semi-spaced
//! old generation; the two cooperate through a card-table remembered set
//! with a per-card first-object table that keeps the heap walk-able at card
//! granularity.
//!
//! Logically, this crate includes these major parts:
//! * [The heap](heap/index.html): fixed-size regions tracked by a
//!   zero-initialized descriptor table, intrusive free-chunk lists, dark
//!   matter formatting, and the [`GenHeap`] front end that owns them.
//! * [The remembered set](remset/index.html): a generic log2-range byte map,
//!   its card-table specialization, the first-object table, and the
//!   card-table remembered set that coordinates all three.
//! * [The evacuator](gc/index.html): the single-threaded young-generation
//!   copying collector, its promotion LAB and survivor-range queue.
//! * [The object model](object/index.html): the hub word at every cell
//!   origin, the tagged cell layouts, and in-hub forwarding pointers.
//!
//! The collector is transient across process lifetimes and publishes a
//! biased card-table base so a generated write barrier reduces to a single
//! byte store.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
pub mod util;
pub mod gc;
pub mod heap;
pub mod object;
pub mod remset;

pub use crate::heap::GenHeap;
pub use crate::heap::HeapOutOfMemory;
pub use crate::util::address::Address;
pub use crate::util::options::Options;
