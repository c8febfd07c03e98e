//! This module contains constants that are needed throughout the codebase.

/// The address value that stands for "no address".
///
/// It is never a valid block or frame address, and is used both as the
/// "nothing pending" marker for callers and as the top-level entry sentinel.
pub const NO_ADDRESS: u64 = 0;

/// The number of trailing instructions in the last segment of a
/// representation that are inspected for a call to the exception helper.
///
/// The exception call inserted by a path-dependent branch is always within
/// the final few instructions of the block.
pub const EXCEPTION_SCAN_WINDOW: usize = 3;

/// The name of the helper that the code generator calls when the generating
/// pass took an exceptional branch.
pub const EXCEPTION_HELPER_NAME: &str = "helper_raise_exception";

/// The default value for whether blocks are regenerated on later visits.
pub const DEFAULT_REGENERATION_ENABLED: bool = true;

/// The default number of successful captures between checkpoint flushes.
///
/// A value of zero disables periodic checkpoints entirely, leaving flushes to
/// path switches and shutdown.
pub const DEFAULT_CHECKPOINT_INTERVAL: usize = 0;

/// The default value for whether the first path fork stops regeneration.
pub const DEFAULT_FREEZE_ON_FORK: bool = true;

/// The default number of captures the recorder will wait before polling the
/// regeneration cutoff.
pub const DEFAULT_CUTOFF_POLL_CAPTURES: usize = 100;

/// The base file name for persisted trace records.
pub const TRACE_RECORD_BASE_NAME: &str = "traceInfo";

/// The file suffix for persisted trace records.
pub const TRACE_RECORD_SUFFIX: &str = ".json";
