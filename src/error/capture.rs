//! This module contains errors pertaining to the capture and finalization of
//! block representations.

use thiserror::Error;

use crate::{error::container, generator::UnitId};

/// Errors that occur while capturing blocks in the
/// [`crate::capture::BlockCapture`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error(
        "Regenerated representation belongs to unit {found:?} but the block was captured in \
         unit {expected:?}"
    )]
    CrossModuleRepresentation { expected: UnitId, found: UnitId },
}

/// A capture error with an associated code address.
pub type LocatedError = container::Located<Error>;

/// The result type for methods that may have capture errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, address: u64) -> Self::Located {
        container::Located::new(address, self)
    }
}
