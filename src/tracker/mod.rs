//! This module contains the [`CallTracker`], which follows calls and returns
//! on the active execution path and attributes every executed block to the
//! function frame it ran in.
//!
//! # Paths
//!
//! The tracker only ever holds one live path. When the execution engine forks
//! the live path, the tracker stores an independent deep copy of its trace and
//! state for every child. When the engine switches to another path, the live
//! trace is persisted and the target's copy becomes the live state.
//!
//! # Best-Effort Call Stacks
//!
//! Matching returns to calls is inherently ambiguous. Call trampolines such as
//! the lazy binding stubs of dynamic libraries can leave an extra frame on the
//! stack, so a return that does not match the top frame is reconciled by
//! discarding at most one stale frame. Anything beyond that is given up on and
//! reported through [`ReturnOutcome`], leaving the edges for that return
//! unrecorded rather than guessed.

pub mod path;

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::{debug, info, warn};

pub use path::{PathSnapshot, PathState};

use crate::{
    error::{
        persist,
        tracking::{Error, Result},
    },
    sink::{RecordTag, TraceSink},
    trace::TraceLog,
    Address,
};

/// The identifier the execution engine uses for an execution path.
pub type PathId = u32;

/// The identifier of the path that is live when tracing begins.
pub const INITIAL_PATH: PathId = 0;

/// A description of a module loaded into the target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleDescriptor {
    /// The name of the module.
    pub name: String,

    /// The process the module was loaded into.
    pub pid: u64,

    /// The address of the module's entry point, which also identifies it.
    pub entry_point: Address,
}

impl ModuleDescriptor {
    /// Constructs a new module descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, pid: u64, entry_point: Address) -> Self {
        let name = name.into();
        Self {
            name,
            pid,
            entry_point,
        }
    }
}

/// A one-shot notification armed by a tracked call, to be handed back to
/// [`CallTracker::on_return`] when the callee returns.
#[derive(Debug, Eq, PartialEq)]
#[must_use]
pub struct ReturnHook {
    caller: Address,
    callee: Address,
}

impl ReturnHook {
    /// Arms a hook for the call from `caller` to `callee`.
    pub fn new(caller: Address, callee: Address) -> Self {
        Self { caller, callee }
    }

    /// Gets the address of the calling block.
    #[must_use]
    pub fn caller(&self) -> Address {
        self.caller
    }

    /// Gets the address of the called function.
    #[must_use]
    pub fn callee(&self) -> Address {
        self.callee
    }
}

/// How a return was matched against the call stack.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReturnOutcome {
    /// The top frame was the returning function.
    Resolved,

    /// The top frame was stale, and the frame beneath it was the returning
    /// function. Both frames were popped.
    ResolvedSkippingFrame { stale: Address },

    /// The top frame did not match and was the only frame, so it was restored
    /// and the return was ignored.
    RecoveredEmpty { popped: Address },

    /// Neither the top frame nor the one beneath it matched, so the stack was
    /// restored and the return was ignored.
    RecoveredMismatch { popped: Address, top: Address },

    /// The call stack was empty, so the return was ignored.
    StackUnderflow,
}

impl ReturnOutcome {
    /// Checks if the return was recorded in the trace.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved | Self::ResolvedSkippingFrame { .. })
    }
}

/// What happened while switching paths.
#[derive(Debug)]
pub struct SwitchOutcome {
    /// The result of persisting the outgoing path's trace.
    pub persisted: persist::Result<()>,

    /// Whether a stale snapshot for the outgoing path was released.
    pub released_stale: bool,
}

/// The call tracker for the live execution path, along with the snapshots of
/// every suspended path.
#[derive(Clone, Debug)]
pub struct CallTracker {
    /// The trace of the live path.
    trace: TraceLog,

    /// The call tracking state of the live path.
    state: PathState,

    /// The identifier of the live path.
    live_path: PathId,

    /// The snapshots of suspended paths, waiting to be switched to.
    snapshots: BTreeMap<PathId, PathSnapshot>,
}

impl CallTracker {
    /// Constructs a tracker whose live path is [`INITIAL_PATH`].
    #[must_use]
    pub fn new() -> Self {
        let trace = TraceLog::new();
        let state = PathState::new();
        let live_path = INITIAL_PATH;
        let snapshots = BTreeMap::new();

        Self {
            trace,
            state,
            live_path,
            snapshots,
        }
    }

    /// Handles the monitored module being loaded.
    pub fn on_module_enter(&mut self, module: &ModuleDescriptor) {
        info!(
            "Monitoring module {} in process {} with entry point {:#x}",
            module.name, module.pid, module.entry_point
        );
        self.state.set_module_entry_point(module.entry_point);
    }

    /// Handles the block at `address` being executed inside the monitored
    /// module, attributing it to the current frame.
    ///
    /// Returns the block that was executed before it on this path, or
    /// [`crate::constant::NO_ADDRESS`] if there was none.
    pub fn on_execute_block(&mut self, address: Address) -> Address {
        if self.trace.resolve_sentinel(address) {
            debug!("New top-level entry {address:#x}");
            self.state.push_frame(address);
        }

        let previous = self.state.enter_block(address);

        if let Some(frame) = self.state.top_frame() {
            self.trace.record_block(frame, address);
            if let Some(caller) = self.state.take_pending_caller_pc() {
                self.trace.record_follow_up(caller, address);
            }
        } else {
            warn!("Call stack is empty while executing block {address:#x}");
        }

        previous
    }

    /// Handles a call from `caller` to `callee`, where `source` and `dest` are
    /// the modules containing the two addresses if known.
    ///
    /// Only calls into or out of the monitored module are tracked. For those,
    /// the callee becomes the current frame and a [`ReturnHook`] is armed.
    pub fn on_call(
        &mut self,
        source: Option<&ModuleDescriptor>,
        dest: Option<&ModuleDescriptor>,
        caller: Address,
        callee: Address,
    ) -> Option<ReturnHook> {
        let entry_point = self.state.module_entry_point();
        let is_monitored = |module: Option<&ModuleDescriptor>| {
            module.is_some_and(|m| m.entry_point == entry_point)
        };
        if !is_monitored(source) && !is_monitored(dest) {
            return None;
        }

        self.state.push_frame(callee);
        Some(ReturnHook::new(caller, callee))
    }

    /// Handles the return of the call that armed `hook`, at `return_site`.
    pub fn on_return(&mut self, hook: ReturnHook, return_site: Address) -> ReturnOutcome {
        let ReturnHook { caller, callee } = hook;

        let Some(popped) = self.state.pop_frame() else {
            warn!(
                "Returning from {callee:#x} to {return_site:#x}, but the call stack is empty"
            );
            return ReturnOutcome::StackUnderflow;
        };

        let outcome = if popped == callee {
            ReturnOutcome::Resolved
        } else {
            match self.state.top_frame() {
                None => {
                    warn!(
                        "Could not match frame {popped:#x} with returning function {callee:#x} \
                         and the call stack is now empty (return site {return_site:#x})"
                    );
                    self.state.push_frame(popped);
                    return ReturnOutcome::RecoveredEmpty { popped };
                }
                Some(top) if top != callee => {
                    warn!(
                        "Could not match frame {popped:#x} with returning function {callee:#x} \
                         (return site {return_site:#x}, stack [{}])",
                        format_stack(self.state.call_stack())
                    );
                    self.state.push_frame(popped);
                    return ReturnOutcome::RecoveredMismatch { popped, top };
                }
                Some(_) => {
                    self.state.pop_frame();
                    ReturnOutcome::ResolvedSkippingFrame { stale: popped }
                }
            }
        };

        if callee == self.trace.last_entry() {
            debug!("Return from top-level entry {callee:#x} at {return_site:#x}");
            self.trace.push_sentinel();
        }

        self.trace
            .record_return(callee, caller, self.state.executed_block_pc());
        self.state.set_pending_caller_pc(caller);

        outcome
    }

    /// Handles the live path forking into `children`, storing an independent
    /// copy of the live trace and state for each of them.
    ///
    /// Returns the number of snapshots stored.
    pub fn on_fork(&mut self, children: &[PathId]) -> usize {
        for child in children {
            debug!("Storing copy of tracing state for path {child}");
            let snapshot = PathSnapshot::new(self.trace.clone(), self.state.clone());
            if self.snapshots.insert(*child, snapshot).is_some() {
                warn!("Replaced an existing snapshot for path {child}");
            }
        }

        children.len()
    }

    /// Handles the engine switching from the path `from` to the path `to`.
    ///
    /// The live trace is persisted to `sink` under `from` first. The snapshot
    /// for `to` then becomes the live state and is removed from the table,
    /// and any stale snapshot under `from` is released.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `from` is not the live path, or if there is no
    /// snapshot for `to`. Nothing is persisted in the first case, and the live
    /// state is left as it was in both.
    pub fn on_switch(
        &mut self,
        from: PathId,
        to: PathId,
        sink: &mut dyn TraceSink,
    ) -> Result<SwitchOutcome> {
        debug!("Switching from path {from} to path {to}");
        if from != self.live_path {
            return Err(Error::NotLivePath {
                path: from,
                live: self.live_path,
            });
        }

        let persisted = sink.persist(RecordTag::Path(from), &self.trace.to_record());

        let snapshot = self
            .snapshots
            .remove(&to)
            .ok_or(Error::SnapshotNotFound { path: to })?;
        debug!("Restoring tracing state for path {to}");
        self.trace.restore_from(snapshot.trace);
        self.state = snapshot.state;
        self.live_path = to;

        let released_stale = self.snapshots.remove(&from).is_some();

        Ok(SwitchOutcome {
            persisted,
            released_stale,
        })
    }

    /// Persists the live trace to `sink`, tagged with the live path.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the sink fails to persist the record.
    pub fn checkpoint(&self, sink: &mut dyn TraceSink) -> persist::Result<()> {
        sink.persist(RecordTag::Path(self.live_path), &self.trace.to_record())
    }

    /// Finishes tracing, persisting the live trace as the final record and
    /// then every suspended path's trace under its own identifier.
    ///
    /// The snapshot table is empty afterwards. Returns the errors of any
    /// records that could not be persisted.
    pub fn finish(&mut self, sink: &mut dyn TraceSink) -> Vec<persist::Error> {
        self.trace.pop_sentinel();

        let mut errors = Vec::new();
        if let Err(e) = sink.persist(RecordTag::Final, &self.trace.to_record()) {
            errors.push(e);
        }

        let snapshots = std::mem::take(&mut self.snapshots);
        for (path, mut snapshot) in snapshots {
            snapshot.trace.pop_sentinel();
            if let Err(e) = sink.persist(RecordTag::Path(path), &snapshot.trace.to_record()) {
                errors.push(e);
            }
        }

        errors
    }

    /// Gets the trace of the live path.
    #[must_use]
    pub fn trace(&self) -> &TraceLog {
        &self.trace
    }

    /// Gets the trace of the live path.
    #[must_use]
    pub fn trace_mut(&mut self) -> &mut TraceLog {
        &mut self.trace
    }

    /// Gets the call tracking state of the live path.
    #[must_use]
    pub fn state(&self) -> &PathState {
        &self.state
    }

    /// Gets the identifier of the live path.
    #[must_use]
    pub fn live_path(&self) -> PathId {
        self.live_path
    }

    /// Gets the snapshot stored for `path`, if any.
    #[must_use]
    pub fn snapshot(&self, path: PathId) -> Option<&PathSnapshot> {
        self.snapshots.get(&path)
    }

    /// Gets the number of suspended paths with stored snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Takes a copy of the live trace and state.
    #[must_use]
    pub fn live_snapshot(&self) -> PathSnapshot {
        PathSnapshot::new(self.trace.clone(), self.state.clone())
    }
}

impl Default for CallTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a call stack for diagnostics, bottom frame first.
fn format_stack(stack: &[Address]) -> String {
    stack.iter().map(|frame| format!("{frame:#x}")).join(", ")
}
