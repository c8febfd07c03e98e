//! This module contains the [`PathState`], the scalar and stack state the
//! call tracker keeps for a single execution path, and the [`PathSnapshot`]
//! that pairs it with the path's trace for storage across forks.

use std::collections::BTreeSet;

use crate::{constant::NO_ADDRESS, trace::TraceLog, Address};

/// The call tracking state of one execution path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathState {
    /// The frames of the functions currently being executed, with the
    /// top-level frame at the bottom.
    call_stack: Vec<Address>,

    /// The last block executed on this path.
    executed_block_pc: Address,

    /// The caller whose call resolved and is waiting to be linked to the next
    /// executed block, or [`NO_ADDRESS`].
    pending_caller_pc: Address,

    /// The predecessor for the next successor edge on this path, or
    /// [`NO_ADDRESS`].
    previous_block_pc: Address,

    /// The entry point of the monitored module.
    module_entry_point: Address,

    /// Every address executed inside the monitored module on this path.
    visited_addresses: BTreeSet<Address>,
}

impl PathState {
    /// Constructs the state for a path that has executed nothing.
    #[must_use]
    pub fn new() -> Self {
        Self {
            call_stack:         Vec::new(),
            executed_block_pc:  NO_ADDRESS,
            pending_caller_pc:  NO_ADDRESS,
            previous_block_pc:  NO_ADDRESS,
            module_entry_point: NO_ADDRESS,
            visited_addresses:  BTreeSet::new(),
        }
    }

    /// Gets the call stack, with the top of the stack last.
    #[must_use]
    pub fn call_stack(&self) -> &[Address] {
        &self.call_stack
    }

    /// Gets the current frame, if the call stack is not empty.
    #[must_use]
    pub fn top_frame(&self) -> Option<Address> {
        self.call_stack.last().copied()
    }

    /// Pushes `frame` onto the call stack.
    pub fn push_frame(&mut self, frame: Address) {
        self.call_stack.push(frame);
    }

    /// Pops the current frame off the call stack.
    pub fn pop_frame(&mut self) -> Option<Address> {
        self.call_stack.pop()
    }

    /// Gets the last block executed on this path.
    #[must_use]
    pub fn executed_block_pc(&self) -> Address {
        self.executed_block_pc
    }

    /// Gets the caller awaiting its follow-up block.
    #[must_use]
    pub fn pending_caller_pc(&self) -> Address {
        self.pending_caller_pc
    }

    /// Sets the caller awaiting its follow-up block.
    pub fn set_pending_caller_pc(&mut self, caller: Address) {
        self.pending_caller_pc = caller;
    }

    /// Takes the caller awaiting its follow-up block, leaving none pending.
    pub fn take_pending_caller_pc(&mut self) -> Option<Address> {
        match std::mem::replace(&mut self.pending_caller_pc, NO_ADDRESS) {
            NO_ADDRESS => None,
            caller => Some(caller),
        }
    }

    /// Records `address` as the block being executed, returning the block
    /// that preceded it on this path.
    pub fn enter_block(&mut self, address: Address) -> Address {
        self.executed_block_pc = address;
        self.visited_addresses.insert(address);
        std::mem::replace(&mut self.previous_block_pc, address)
    }

    /// Gets the entry point of the monitored module.
    #[must_use]
    pub fn module_entry_point(&self) -> Address {
        self.module_entry_point
    }

    /// Sets the entry point of the monitored module.
    pub fn set_module_entry_point(&mut self, entry_point: Address) {
        self.module_entry_point = entry_point;
    }

    /// Gets every address executed inside the monitored module on this path.
    #[must_use]
    pub fn visited_addresses(&self) -> &BTreeSet<Address> {
        &self.visited_addresses
    }
}

impl Default for PathState {
    fn default() -> Self {
        Self::new()
    }
}

/// A deep copy of everything the tracker knows about a path, stored while
/// that path is suspended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PathSnapshot {
    pub trace: TraceLog,
    pub state: PathState,
}

impl PathSnapshot {
    /// Constructs a snapshot from its parts.
    #[must_use]
    pub fn new(trace: TraceLog, state: PathState) -> Self {
        Self { trace, state }
    }
}
