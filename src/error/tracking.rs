//! This module contains errors pertaining to call tracking and the path
//! snapshot table.

use thiserror::Error;

use crate::tracker::PathId;

/// Errors that occur in the [`crate::tracker::CallTracker`].
///
/// These all indicate that the execution engine broke the ordering contract
/// between fork and switch notifications.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("No snapshot is stored for path {path:?}, so it cannot be restored")]
    SnapshotNotFound { path: PathId },

    #[error("Path {path:?} was used as the live path, but the live path is {live:?}")]
    NotLivePath { path: PathId, live: PathId },
}

/// The result type for methods that may have tracking errors.
pub type Result<T> = std::result::Result<T, Error>;
