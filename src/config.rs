//! This module contains the configuration for the [`crate::recorder::Recorder`].

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constant::{DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_FREEZE_ON_FORK, DEFAULT_REGENERATION_ENABLED},
    error::config::{Error, Result},
};

/// The configuration for the recorder.
///
/// It can be built in code using the `with_*` methods, or loaded from TOML
/// where every key is optional and written in camel case:
///
/// ```toml
/// regenerationEnabled = true
/// checkpointInterval = 500
/// freezeOnFork = true
/// outputDirectory = "s2e-out"
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Whether blocks are regenerated on later executions until they are
    /// stable. When disabled, every first capture is final.
    ///
    /// Defaults to [`DEFAULT_REGENERATION_ENABLED`].
    pub regeneration_enabled: bool,

    /// The number of successful captures between intermediate flushes of the
    /// live trace. Zero disables intermediate flushes, leaving only the
    /// flushes on switch and at shutdown.
    ///
    /// Defaults to [`DEFAULT_CHECKPOINT_INTERVAL`].
    pub checkpoint_interval: usize,

    /// Whether the first fork of an execution path stops regeneration.
    ///
    /// Defaults to [`DEFAULT_FREEZE_ON_FORK`].
    pub freeze_on_fork: bool,

    /// The directory that trace records are written into when the recorder
    /// uses a [`crate::sink::DirectorySink`].
    pub output_directory: Option<PathBuf>,
}

impl Config {
    /// Parses a configuration from the TOML in `source`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `source` is not valid TOML for a configuration.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Loads a configuration from the TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the file cannot be read or does not contain a valid
    /// configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let source = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_toml_str(&source)
    }

    /// Sets the `regeneration_enabled` config parameter to `value`.
    #[must_use]
    pub fn with_regeneration_enabled(mut self, value: bool) -> Self {
        self.regeneration_enabled = value;
        self
    }

    /// Sets the `checkpoint_interval` config parameter to `value`.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, value: usize) -> Self {
        self.checkpoint_interval = value;
        self
    }

    /// Sets the `freeze_on_fork` config parameter to `value`.
    #[must_use]
    pub fn with_freeze_on_fork(mut self, value: bool) -> Self {
        self.freeze_on_fork = value;
        self
    }

    /// Sets the `output_directory` config parameter to `value`.
    #[must_use]
    pub fn with_output_directory(mut self, value: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(value.into());
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            regeneration_enabled: DEFAULT_REGENERATION_ENABLED,
            checkpoint_interval:  DEFAULT_CHECKPOINT_INTERVAL,
            freeze_on_fork:       DEFAULT_FREEZE_ON_FORK,
            output_directory:     None,
        }
    }
}
