//! This module contains the algorithm that decides whether two generations of
//! the same block are equivalent.
//!
//! # Why Generations Differ
//!
//! The only expected difference between two generations of the same static
//! block is a trailing call to the exception helper, inserted when the
//! generating pass took a path-dependent exceptional branch. A side that
//! carries such a call is _invalid_. Any other difference is resolved by
//! generating again rather than by guessing which side is right.

use crate::{
    constant::EXCEPTION_SCAN_WINDOW,
    generator::{Instruction, Representation},
};

/// The summary of one side of a comparison.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Summary {
    /// The number of instructions in the last segment after skipping the
    /// leading local allocations.
    pub instruction_count: usize,

    /// Whether the final instructions are free of exception-raising calls.
    pub valid: bool,
}

impl Summary {
    /// Summarises the last segment of `representation`.
    ///
    /// A representation without segments has no instructions and is valid.
    #[must_use]
    pub fn of(representation: &dyn Representation) -> Self {
        let segment = representation.last_segment().unwrap_or_default();
        let body = skip_local_allocations(segment);
        let window_start = body.len().saturating_sub(EXCEPTION_SCAN_WINDOW);
        let valid = !body[window_start..].iter().any(Instruction::raises_exception);

        Self {
            instruction_count: body.len(),
            valid,
        }
    }
}

/// Skips the leading run of local allocations in `segment`.
fn skip_local_allocations(segment: &[Instruction]) -> &[Instruction] {
    let start = segment
        .iter()
        .position(|instruction| !instruction.is_local_allocation())
        .unwrap_or(segment.len());
    &segment[start..]
}

/// The result of comparing an old generation of a block against a new one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Comparison {
    /// Both sides are valid and have the same instruction count, so the block
    /// is stable.
    Equal,

    /// Both sides are valid but their instruction counts differ.
    CountMismatch { old: usize, new: usize },

    /// Only the new side raises an exception, so the old side is kept.
    NewRaises,

    /// Only the old side raises an exception, so the new side is promoted.
    OldRaises,

    /// Both sides raise an exception.
    BothRaise,
}

impl Comparison {
    /// Checks if the comparison found the two generations equivalent.
    #[must_use]
    pub fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Checks if the old generation should be kept in preference to the new
    /// one.
    #[must_use]
    pub fn keeps_old(&self) -> bool {
        matches!(self, Self::Equal | Self::NewRaises)
    }
}

/// Compares the `old` and `new` generations of the same block.
#[must_use]
pub fn compare(old: &dyn Representation, new: &dyn Representation) -> Comparison {
    let old = Summary::of(old);
    let new = Summary::of(new);

    match (old.valid, new.valid) {
        (true, true) if old.instruction_count == new.instruction_count => Comparison::Equal,
        (true, true) => Comparison::CountMismatch {
            old: old.instruction_count,
            new: new.instruction_count,
        },
        (true, false) => Comparison::NewRaises,
        (false, true) => Comparison::OldRaises,
        (false, false) => Comparison::BothRaise,
    }
}
