//! This module contains the interface between the recorder and the external
//! code generator that turns a code address into an intermediate
//! representation of the block at that address.
//!
//! The recorder never looks inside a representation beyond the narrow view
//! provided by [`Representation`]. It only decides whether to keep, replace or
//! finalize the representation it holds for each address.
//!
//! # Pinning
//!
//! Representations are shared with the generator as [`DynRepresentation`]
//! handles. While the recorder holds a handle the representation is pinned,
//! and a generator that performs its own collection must not reclaim it. When
//! the recorder lets go of a representation it first passes it back through
//! [`CodeGenerator::release`].

use std::{fmt::Debug, rc::Rc};

use downcast_rs::{impl_downcast, Downcast};

use crate::{constant::EXCEPTION_HELPER_NAME, Address};

/// An identifier for the unit (for example a module of generated code) that
/// owns a representation.
pub type UnitId = u64;

/// A dynamically dispatched [`Representation`] handle.
pub type DynRepresentation = Rc<dyn Representation>;

/// A single instruction in a representation, as far as the recorder cares.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Instruction {
    /// A local stack allocation emitted at the start of a segment by the code
    /// generator. These carry no semantic weight for the block.
    LocalAllocation,

    /// A call to the function named `callee`.
    Call { callee: String },

    /// Any other instruction.
    Other,
}

impl Instruction {
    /// Constructs a call instruction to `callee`.
    #[must_use]
    pub fn call(callee: impl Into<String>) -> Self {
        Self::Call {
            callee: callee.into(),
        }
    }

    /// Checks if the instruction is a local allocation pseudo-instruction.
    #[must_use]
    pub fn is_local_allocation(&self) -> bool {
        matches!(self, Self::LocalAllocation)
    }

    /// Checks if the instruction is a call to the exception-raising helper.
    #[must_use]
    pub fn raises_exception(&self) -> bool {
        matches!(self, Self::Call { callee } if callee == EXCEPTION_HELPER_NAME)
    }
}

/// The view of a generated block that the recorder needs in order to decide
/// whether two generations of the same block are equivalent.
///
/// # Self Bounds
///
/// [`Downcast`] allows the holder of a [`DynRepresentation`] to get back at the
/// generator's concrete type, and [`Debug`] aids in debugging.
pub trait Representation
where
    Self: Downcast + Debug,
{
    /// Gets the identifier of the unit that owns this representation.
    ///
    /// All representations captured by one recorder must belong to the same
    /// unit.
    fn owning_unit(&self) -> UnitId;

    /// Gets the instructions of the last basic segment of the representation,
    /// or [`None`] if it has no segments.
    fn last_segment(&self) -> Option<&[Instruction]>;
}
impl_downcast!(Representation);

/// The interface to the external code generator.
///
/// Generation is demand-driven: the recorder asks for a block when the
/// execution engine reaches its address, and asks again on later visits until
/// the block is finalized.
pub trait CodeGenerator {
    /// Generates the representation of the block at `address`.
    ///
    /// Returns [`None`] if the generator is unable to produce one.
    fn generate(&mut self, address: Address) -> Option<DynRepresentation>;

    /// Generates the representation of the block at `address` again, with
    /// `previous` being the representation currently held by the recorder.
    ///
    /// Returns [`None`] if the generator is unable to produce one.
    fn regenerate(
        &mut self,
        address: Address,
        previous: &DynRepresentation,
    ) -> Option<DynRepresentation>;

    /// Called when the recorder drops its hold on `representation`, allowing
    /// the generator to discard it.
    fn release(&mut self, address: Address, representation: DynRepresentation) {
        let _ = (address, representation);
    }
}

/// A simple concrete representation made up of segments of instructions.
///
/// Generators that do not need a richer form can use this directly.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockIr {
    unit:     UnitId,
    segments: Vec<Vec<Instruction>>,
}

impl BlockIr {
    /// Constructs a new representation owned by `unit` with no segments.
    #[must_use]
    pub fn new(unit: UnitId) -> Self {
        let segments = Vec::new();
        Self { unit, segments }
    }

    /// Appends a segment containing `instructions`.
    #[must_use]
    pub fn with_segment(mut self, instructions: impl Into<Vec<Instruction>>) -> Self {
        self.segments.push(instructions.into());
        self
    }

    /// Gets all of the segments of the representation.
    #[must_use]
    pub fn segments(&self) -> &[Vec<Instruction>] {
        &self.segments
    }

    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynRepresentation {
        Rc::new(self)
    }
}

impl Representation for BlockIr {
    fn owning_unit(&self) -> UnitId {
        self.unit
    }

    fn last_segment(&self) -> Option<&[Instruction]> {
        self.segments.last().map(Vec::as_slice)
    }
}
