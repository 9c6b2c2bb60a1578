//! The young-generation evacuator and its supporting machinery.

pub mod evacuator;
pub mod lab;
pub mod roots;

pub use self::evacuator::{EvacuationCounters, Evacuator};
pub use self::roots::{
    CodeScanner, NoMutableCode, NoSpecialReferences, RootScanner, SlotRootSet, SlotVisitor,
    SpecialReferenceManager,
};

/// The evacuator ran out of to-space. Recovered by promoting the collection
/// to a full GC.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EvacuationFailure;
