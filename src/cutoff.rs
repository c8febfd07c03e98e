//! This module contains the type definitions necessary to support cutting off
//! block regeneration from outside the recorder.
//!
//! # Polling
//!
//! The recorder polls its cutoff after every [`RegenerationCutoff::poll_every`]
//! captures rather than on every capture. A cutoff only ever moves the
//! recorder from regenerating to frozen, so there is no way to resume
//! regeneration once it has fired.

use std::{
    fmt::Debug,
    rc::Rc,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use crate::{capture::CaptureStats, constant::DEFAULT_CUTOFF_POLL_CAPTURES};

/// A dynamically dispatched [`RegenerationCutoff`] instance.
pub type DynCutoff = Rc<dyn RegenerationCutoff>;

/// The interface to an object that can be polled to see if the recorder should
/// stop regenerating blocks.
pub trait RegenerationCutoff
where
    Self: Debug,
{
    /// Checks if regeneration should stop, given the capture statistics so
    /// far.
    #[must_use]
    fn should_stop(&self, stats: &CaptureStats) -> bool;

    /// Gets the number of successful captures the recorder should wait before
    /// polling the cutoff.
    #[must_use]
    fn poll_every(&self) -> usize;
}

/// A cutoff that never stops regeneration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NeverCutoff;

impl NeverCutoff {
    /// Wraps `self` into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynCutoff {
        Rc::new(self)
    }
}

impl RegenerationCutoff for NeverCutoff {
    fn should_stop(&self, _: &CaptureStats) -> bool {
        false
    }

    fn poll_every(&self) -> usize {
        usize::MAX
    }
}

/// A cutoff that stops regeneration once a flag in the form of an atomic
/// boolean is set.
///
/// By default, it asks to be polled every [`DEFAULT_CUTOFF_POLL_CAPTURES`]
/// captures. This is configurable by calling [`Self::polling_every`].
#[derive(Clone, Debug)]
pub struct FlagCutoff {
    /// The flag that should be set externally to stop regeneration.
    flag: Arc<AtomicBool>,

    /// The number of captures between polls.
    poll_captures: usize,
}

impl FlagCutoff {
    /// Constructs a new `FlagCutoff` wrapping the provided `flag`.
    #[must_use]
    pub fn new(flag: Arc<AtomicBool>) -> Self {
        let poll_captures = DEFAULT_CUTOFF_POLL_CAPTURES;
        Self {
            flag,
            poll_captures,
        }
    }

    /// Specifies the number of captures that the recorder should wait before
    /// polling the cutoff.
    #[must_use]
    pub fn polling_every(mut self, captures: usize) -> Self {
        self.poll_captures = captures.max(1);
        self
    }

    /// Wraps the cutoff into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynCutoff {
        Rc::new(self)
    }
}

impl RegenerationCutoff for FlagCutoff {
    fn should_stop(&self, _: &CaptureStats) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    fn poll_every(&self) -> usize {
        self.poll_captures
    }
}

/// A cutoff that stops regeneration once a given number of blocks have been
/// finalized.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FinalizedCutoff {
    limit: usize,
}

impl FinalizedCutoff {
    /// Constructs a cutoff that fires once `limit` blocks are final.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    /// Wraps the cutoff into an [`Rc`].
    #[must_use]
    pub fn in_rc(self) -> DynCutoff {
        Rc::new(self)
    }
}

impl RegenerationCutoff for FinalizedCutoff {
    fn should_stop(&self, stats: &CaptureStats) -> bool {
        stats.finalized >= self.limit
    }

    fn poll_every(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use crate::{
        capture::CaptureStats,
        cutoff::{FinalizedCutoff, FlagCutoff, NeverCutoff, RegenerationCutoff},
    };

    #[test]
    fn never_cutoff_never_fires() {
        let cutoff = NeverCutoff.in_rc();
        assert!(!cutoff.should_stop(&CaptureStats::default()));
    }

    #[test]
    fn flag_cutoff_follows_its_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let cutoff = FlagCutoff::new(flag.clone()).polling_every(0);
        assert_eq!(cutoff.poll_every(), 1);
        assert!(!cutoff.should_stop(&CaptureStats::default()));

        flag.store(true, Ordering::Relaxed);
        assert!(cutoff.should_stop(&CaptureStats::default()));
    }

    #[test]
    fn finalized_cutoff_fires_at_its_limit() {
        let cutoff = FinalizedCutoff::new(2);
        let mut stats = CaptureStats::default();
        stats.finalized = 1;
        assert!(!cutoff.should_stop(&stats));

        stats.finalized = 2;
        assert!(cutoff.should_stop(&stats));
    }
}
