//! External collaborators of the evacuator: root scanning, mutable code
//! scanning and special-reference processing.

use crate::util::Address;

/// Receives the address of a slot holding a reference. The evacuator
/// implements this: it resolves the slot through any forwarding pointer,
/// evacuates the referent if needed, and writes the new reference back.
pub trait SlotVisitor {
    fn visit_slot(&mut self, slot: Address);
}

/// Traverses thread stacks, monitors and external handles, reporting every
/// reference slot to the visitor.
pub trait RootScanner {
    fn scan_roots(&mut self, visitor: &mut dyn SlotVisitor);
}

/// Scans mutable code regions for embedded references. Boot code is never
/// scanned: its references are immutable and point only into the boot heap.
pub trait CodeScanner {
    fn scan_mutable_code(&mut self, visitor: &mut dyn SlotVisitor);
}

/// Processes soft/weak/phantom references discovered during evacuation.
///
/// The evacuator collects discovered reference cells while discovery is
/// enabled, then hands them over with discovery disabled. For each
/// discovered cell the manager must either clear the referent slot or pass
/// the slot to the visitor, which treats it as a strong reference.
pub trait SpecialReferenceManager {
    fn process_discovered(&mut self, discovered: &[Address], visitor: &mut dyn SlotVisitor);
}

/// A root set over a plain list of slot addresses. Useful for embedders
/// with explicit handle tables, and for tests.
#[derive(Default)]
pub struct SlotRootSet {
    pub slots: Vec<Address>,
}

impl SlotRootSet {
    pub fn new(slots: Vec<Address>) -> Self {
        SlotRootSet { slots }
    }
}

impl RootScanner for SlotRootSet {
    fn scan_roots(&mut self, visitor: &mut dyn SlotVisitor) {
        for slot in &self.slots {
            visitor.visit_slot(*slot);
        }
    }
}

/// No mutable code regions.
pub struct NoMutableCode;

impl CodeScanner for NoMutableCode {
    fn scan_mutable_code(&mut self, _visitor: &mut dyn SlotVisitor) {}
}

/// Treats every discovered special reference as strong.
pub struct NoSpecialReferences;

impl SpecialReferenceManager for NoSpecialReferences {
    fn process_discovered(&mut self, discovered: &[Address], visitor: &mut dyn SlotVisitor) {
        use crate::object::{classify, CellClass};
        use crate::util::constants::LOG_BYTES_IN_WORD;
        for cell in discovered {
            if let CellClass::Live(hub) = classify(*cell) {
                if let Some(referent) = hub.special_referent {
                    visitor.visit_slot(*cell + (referent << LOG_BYTES_IN_WORD));
                }
            }
        }
    }
}
