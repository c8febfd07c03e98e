//! This module contains errors pertaining to the persistence of trace records.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Errors that occur while writing a [`crate::trace::TraceRecord`] to a
/// [`crate::sink::TraceSink`].
///
/// None of these are fatal to tracing. They are logged and buffered by the
/// recorder, and never retried.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Could not write trace record to {path:?}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Could not serialize trace record: {message}")]
    Serialization { message: String },
}

impl Error {
    /// Constructs an I/O error for the file at `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path:   path.into(),
            source: Arc::new(source),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            message: value.to_string(),
        }
    }
}

/// The result type for methods that may have persistence errors.
pub type Result<T> = std::result::Result<T, Error>;
