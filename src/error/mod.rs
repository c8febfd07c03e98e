//! This module contains the primary error type for the recorder's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.
//!
//! All of the errors implement [`std::error::Error`], and hence can be used
//! with `anyhow::Error`.

pub mod capture;
pub mod config;
pub mod container;
pub mod logging;
pub mod persist;
pub mod tracking;

use thiserror::Error;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Error>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors from the block capture subsystem, located at the block address.
    #[error(transparent)]
    Capture(#[from] capture::LocatedError),

    /// Errors from the call tracking subsystem.
    #[error(transparent)]
    Tracking(#[from] tracking::Error),

    /// Errors from persisting trace records.
    #[error(transparent)]
    Persist(#[from] persist::Error),

    /// Errors from loading the configuration.
    #[error(transparent)]
    Config(#[from] config::Error),

    /// Errors from setting up log output.
    #[error(transparent)]
    Logging(#[from] logging::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Checks whether the error means that tracing cannot continue.
    ///
    /// Persistence failures are the only errors that the recorder tolerates;
    /// everything else signals a broken contract with a collaborator.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Persist(_))
    }
}

/// A container of errors that may occur in the recorder.
pub type Errors = container::Errors<Error>;
