//! This library records the code and control flow of a binary as it runs under
//! a dynamic execution engine, so that the binary can later be recompiled from
//! what was observed. It is a _best effort_ recording: only code that actually
//! ran is captured, and call edges that cannot be matched are left out rather
//! than guessed.
//!
//! # How it Works
//!
//! From a very high level, recording is performed as follows:
//!
//! 1. The execution engine notifies a [`Recorder`] of every block it executes
//!    inside the monitored module, and of every call, return, fork and path
//!    switch.
//! 2. The [`capture::BlockCapture`] asks the engine's
//!    [`generator::CodeGenerator`] for a representation of each block,
//!    regenerating it on later visits until two generations agree. At that
//!    point the block is _finalized_.
//! 3. The [`tracker::CallTracker`] follows the call stack of the live path and
//!    records which blocks ran in which function, who called each function,
//!    and where each call returned to.
//! 4. Everything path-local lives in a [`trace::TraceLog`]. Forks clone it,
//!    switches persist the outgoing one to a [`sink::TraceSink`] and restore
//!    the incoming one.
//! 5. When recording finishes, the final trace of every path is persisted as
//!    a [`trace::record::TraceRecord`].
//!
//! # Basic Usage
//!
//! Construct a [`Recorder`] with [`new`], forward the engine's notifications
//! to it, and call [`Recorder::finish`] once the engine is done. See the
//! [`recorder`] module for a complete example.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod capture;
pub mod config;
pub mod constant;
pub mod cutoff;
pub mod data;
pub mod error;
pub mod generator;
pub mod logging;
pub mod recorder;
pub mod sink;
pub mod trace;
pub mod tracker;

// Re-exports to provide the library interface.
pub use config::Config;
pub use recorder::Recorder;
pub use trace::TraceLog;

/// A code location in the monitored module.
///
/// The value [`constant::NO_ADDRESS`] never denotes a real block.
pub type Address = u64;

/// Creates a new recorder with the provided `config`, persisting its traces
/// to `sink`.
#[must_use]
pub fn new(config: Config, sink: impl sink::TraceSink + 'static) -> Recorder {
    Recorder::new(config, sink)
}
