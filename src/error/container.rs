//! This module contains the generic error wrappers shared by the subsystems:
//! [`Located`] for errors tied to a block address, and [`Errors`] for the
//! non-fatal errors that the recorder accumulates over a run.

use std::fmt::Formatter;

use thiserror::Error;

use crate::Address;

/// An error that arose while handling the block at a particular code address.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub struct Located<E>
where
    E: Clone,
{
    /// The address of the block being handled.
    pub location: Address,

    /// The underlying error.
    pub payload: E,
}

impl<E> Located<E>
where
    E: Clone,
{
    /// Attaches `location` to `payload`.
    pub fn new(location: Address, payload: E) -> Self {
        Self { location, payload }
    }

    /// Discards the location, returning the underlying error.
    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// Renders the address as a fixed-width big-endian hex string, so that
/// addresses line up when many errors are printed together.
impl<E> std::fmt::Display for Located<E>
where
    E: std::fmt::Display + Clone,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let address = hex::encode(self.location.to_be_bytes());
        write!(f, "[0x{address}]: {}", self.payload)
    }
}

/// Errors that can be tied to the address of the block being handled.
pub trait Locatable
where
    Self: Sized,
{
    /// The error type once an address has been attached.
    type Located;

    /// Ties the error to the block at `address`.
    fn locate(self, address: Address) -> Self::Located;
}

/// Lets a whole result be located at once with `?`-friendly chaining.
impl<T, E> Locatable for Result<T, E>
where
    E: std::error::Error + Clone,
{
    type Located = Result<T, Located<E>>;

    fn locate(self, address: Address) -> Self::Located {
        self.map_err(|e| Located::new(address, e))
    }
}

/// The errors recorded over a run, in the order they were encountered.
#[derive(Clone, Debug, Error)]
pub struct Errors<E> {
    payloads: Vec<E>,
}

impl<E> Errors<E> {
    /// Creates an empty record of errors.
    #[must_use]
    pub fn new() -> Self {
        Self {
            payloads: Vec::new(),
        }
    }

    /// Gets the recorded errors, oldest first.
    #[must_use]
    pub fn payloads(&self) -> &[E] {
        &self.payloads
    }

    /// Iterates over the recorded errors, oldest first.
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.payloads.iter()
    }

    /// Gets the number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    /// Checks if no errors have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }
}

impl<E> Errors<E>
where
    E: std::error::Error,
{
    /// Records `error`.
    pub fn add(&mut self, error: E) {
        self.payloads.push(error);
    }
}

impl<E> Default for Errors<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Extend<E> for Errors<E>
where
    E: std::error::Error,
{
    fn extend<I: IntoIterator<Item = E>>(&mut self, iter: I) {
        self.payloads.extend(iter);
    }
}

impl<E> IntoIterator for Errors<E> {
    type IntoIter = std::vec::IntoIter<E>;
    type Item = E;

    fn into_iter(self) -> Self::IntoIter {
        self.payloads.into_iter()
    }
}

impl<'a, E> IntoIterator for &'a Errors<E> {
    type IntoIter = std::slice::Iter<'a, E>;
    type Item = &'a E;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E> From<Errors<E>> for Vec<E> {
    fn from(value: Errors<E>) -> Self {
        value.payloads
    }
}

/// Prints a count header followed by one numbered error per line.
impl<E> std::fmt::Display for Errors<E>
where
    E: std::fmt::Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.payloads.len() {
            0 => write!(f, "No errors were recorded"),
            count => {
                writeln!(f, "{count} error(s) were recorded:")?;
                for (index, error) in self.payloads.iter().enumerate() {
                    writeln!(f, "  {index}: {error}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::{
        capture,
        container::{Errors, Locatable},
        tracking,
    };

    #[test]
    fn located_errors_display_the_address_in_hex() {
        let error = capture::Error::CrossModuleRepresentation {
            expected: 1,
            found:    2,
        }
        .locate(0x0040_1000);

        assert_eq!(error.location, 0x0040_1000);
        assert!(error.to_string().starts_with("[0x0000000000401000]: "));
    }

    #[test]
    fn results_can_be_located() {
        let result: Result<(), tracking::Error> = Err(tracking::Error::SnapshotNotFound { path: 1 });
        let located = result.locate(0x20).expect_err("Result was an error");

        assert_eq!(located.location, 0x20);
        assert_eq!(
            located.into_payload(),
            tracking::Error::SnapshotNotFound { path: 1 }
        );
    }

    #[test]
    fn errors_keep_their_order() {
        let mut errors = Errors::new();
        assert!(errors.is_empty());
        assert_eq!(errors.to_string(), "No errors were recorded");

        errors.add(tracking::Error::SnapshotNotFound { path: 3 });
        errors.extend([tracking::Error::NotLivePath { path: 1, live: 0 }]);

        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors.iter().next(),
            Some(&tracking::Error::SnapshotNotFound { path: 3 })
        );
        let text = errors.to_string();
        assert!(text.starts_with("2 error(s) were recorded:"));
        assert!(text.contains("  1: Path 1 was used as the live path"));

        let payloads: Vec<_> = errors.into();
        assert_eq!(payloads.len(), 2);
    }
}
