//! This module contains errors pertaining to setting up log output.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Errors that occur in [`crate::logging::initialize_logging`].
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Could not open log file {path:?}: {source}")]
    LogFile {
        path:   PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl Error {
    /// Constructs an error for the log file at `path` that could not be
    /// opened.
    pub fn log_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::LogFile {
            path:   path.into(),
            source: Arc::new(source),
        }
    }
}

/// The result type for methods that may have logging errors.
pub type Result<T> = std::result::Result<T, Error>;
