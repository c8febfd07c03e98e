//! This module contains errors pertaining to loading the recorder
//! configuration.

use std::{path::PathBuf, sync::Arc};

use thiserror::Error;

/// Errors that occur while loading a [`crate::config::Config`].
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error("Could not read configuration file {path:?}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error(transparent)]
    Parse(#[from] toml::de::Error),
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

/// The result type for methods that may have configuration errors.
pub type Result<T> = std::result::Result<T, Error>;
