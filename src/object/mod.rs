//! The object model: the hub word at every cell origin, the tagged cell
//! layouts behind it, and in-hub forwarding pointers.
//!
//! Every address in the heap that is a cell origin starts with one hub word.
//! The hub word unambiguously classifies the cell as a live object, a free
//! chunk, or dark matter, so a heap walker can always advance by the size of
//! the cell it is looking at.

pub mod forwarding;
pub mod hub;

pub use self::hub::{CellClass, CellLayout, Hub};
pub use self::hub::{classify, size_of_cell};
