//! This module contains the [`BlockCapture`], which owns the representation of
//! every block the recorder has seen and decides when each one is stable
//! enough to stop regenerating.
//!
//! # Per-Address Lifecycle
//!
//! ```text
//! UNSEEN ──capture──▶ CAPTURED(1) ──regen, not equal──▶ CAPTURED(k + 1)
//!                         │
//!                         └──regen, equal──▶ FINALIZED ──any──▶ FINALIZED
//! ```
//!
//! Capture state is shared by every execution path. A block generated on one
//! path is the same static block on every other path, so only the successor
//! edges, which live in the path's [`TraceLog`], are path-local.

pub mod finalize;

use std::collections::HashMap;

use tracing::{debug, info};

use crate::{
    capture::finalize::Comparison,
    constant::NO_ADDRESS,
    error::{
        capture::{Error, Result},
        container::Locatable,
    },
    generator::{CodeGenerator, DynRepresentation, UnitId},
    trace::TraceLog,
    Address,
};

/// Whether the capture engine is still regenerating blocks on later visits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaptureMode {
    /// Blocks that are not yet finalized are regenerated on every visit.
    Regenerating,

    /// Every block that has been captured is treated as final.
    ///
    /// Once entered, this mode is never left.
    Frozen,
}

/// The capture state of a single block.
#[derive(Clone, Debug)]
pub struct CapturedBlock {
    /// The representation currently held for the block. Holding it pins it
    /// against collection by the generator.
    representation: DynRepresentation,

    /// The number of representations that have been stored for the block,
    /// starting at 1.
    generation: usize,

    /// Whether the block has been found to be stable.
    finalized: bool,
}

impl CapturedBlock {
    /// Constructs the state for a block captured for the first time.
    #[must_use]
    fn new(representation: DynRepresentation) -> Self {
        let generation = 1;
        let finalized = false;
        Self {
            representation,
            generation,
            finalized,
        }
    }

    /// Gets the representation currently held for the block.
    #[must_use]
    pub fn representation(&self) -> &DynRepresentation {
        &self.representation
    }

    /// Gets the generation of the currently held representation.
    #[must_use]
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Checks if the block has been finalized.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// What a call to [`BlockCapture::capture`] did.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaptureOutcome {
    /// The generator could not produce a representation for a new block.
    Failed,

    /// The block was captured for the first time.
    Captured,

    /// The block was already final, or regeneration is frozen.
    CacheHit,

    /// The regenerated representation matched and the block is now final.
    Finalized,

    /// The regenerated representation replaced the held one.
    Replaced { generation: usize },

    /// The regenerated representation was discarded in favour of the held
    /// one.
    KeptPrevious,

    /// The generator could not regenerate the block, so the held
    /// representation stays.
    RegenerationFailed,
}

impl CaptureOutcome {
    /// Checks if a representation is held for the block after the capture.
    #[must_use]
    pub fn is_captured(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Summary statistics for the capture engine.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CaptureStats {
    /// The number of distinct blocks that have been captured.
    pub captured: usize,

    /// The number of captured blocks that have been finalized.
    pub finalized: usize,

    /// The number of successful calls to [`BlockCapture::capture`].
    pub successful_captures: usize,
}

/// The engine that captures and finalizes block representations.
#[derive(Clone, Debug)]
pub struct BlockCapture {
    /// The state for every block that has been captured.
    blocks: HashMap<Address, CapturedBlock>,

    /// Whether blocks are still being regenerated.
    mode: CaptureMode,

    /// The number of successful captures between checkpoints, with zero
    /// disabling them.
    checkpoint_interval: usize,

    /// The number of successful captures so far.
    successful_captures: usize,

    /// Whether a checkpoint has come due and not yet been taken.
    checkpoint_due: bool,

    /// The unit owning the first captured representation, which every later
    /// representation must also belong to.
    expected_unit: Option<UnitId>,
}

impl BlockCapture {
    /// Constructs a new capture engine.
    ///
    /// If `regenerate` is false, the engine starts in [`CaptureMode::Frozen`]
    /// and every first capture is final.
    #[must_use]
    pub fn new(regenerate: bool, checkpoint_interval: usize) -> Self {
        let blocks = HashMap::new();
        let mode = if regenerate {
            CaptureMode::Regenerating
        } else {
            CaptureMode::Frozen
        };
        let successful_captures = 0;
        let checkpoint_due = false;
        let expected_unit = None;

        Self {
            blocks,
            mode,
            checkpoint_interval,
            successful_captures,
            checkpoint_due,
            expected_unit,
        }
    }

    /// Captures the block at `address`, generating or regenerating its
    /// representation with `generator` as needed.
    ///
    /// The returned outcome is [`CaptureOutcome::Failed`] only when a block
    /// seen for the first time could not be generated; the block is then
    /// left absent so that no successor edge can refer to it.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if a generated representation belongs to a different
    /// unit than the first representation ever captured. This indicates a
    /// broken generator and is not recoverable.
    pub fn capture(
        &mut self,
        address: Address,
        generator: &mut impl CodeGenerator,
    ) -> Result<CaptureOutcome> {
        let outcome = match self.blocks.get(&address) {
            None => self.capture_new(address, generator)?,
            Some(block) if block.finalized || self.mode == CaptureMode::Frozen => {
                CaptureOutcome::CacheHit
            }
            Some(_) => self.regenerate(address, generator)?,
        };

        if outcome.is_captured() {
            self.successful_captures += 1;
            if self.checkpoint_interval > 0
                && self.successful_captures % self.checkpoint_interval == 0
            {
                self.checkpoint_due = true;
            }
        }

        Ok(outcome)
    }

    /// Captures a block that has not been seen before.
    fn capture_new(
        &mut self,
        address: Address,
        generator: &mut impl CodeGenerator,
    ) -> Result<CaptureOutcome> {
        debug!("Capturing block {address:#x}");
        let Some(representation) = generator.generate(address) else {
            debug!("No representation was generated for block {address:#x}");
            return Ok(CaptureOutcome::Failed);
        };

        let found = representation.owning_unit();
        let expected = *self.expected_unit.get_or_insert(found);
        if let Err(e) = check_unit(expected, found, address) {
            generator.release(address, representation);
            return Err(e);
        }

        self.blocks.insert(address, CapturedBlock::new(representation));
        Ok(CaptureOutcome::Captured)
    }

    /// Regenerates a captured block that is not yet final and decides which
    /// of the two generations to keep.
    fn regenerate(
        &mut self,
        address: Address,
        generator: &mut impl CodeGenerator,
    ) -> Result<CaptureOutcome> {
        let expected_unit = self.expected_unit;
        let Some(block) = self.blocks.get_mut(&address) else {
            return Ok(CaptureOutcome::Failed);
        };

        debug!(
            "Regenerating block {address:#x} at generation {}",
            block.generation
        );
        let Some(new) = generator.regenerate(address, &block.representation) else {
            debug!("Regeneration of block {address:#x} produced nothing, keeping generation");
            return Ok(CaptureOutcome::RegenerationFailed);
        };

        let expected = expected_unit.unwrap_or_else(|| block.representation.owning_unit());
        if let Err(e) = check_unit(expected, new.owning_unit(), address) {
            generator.release(address, new);
            return Err(e);
        }

        let comparison = finalize::compare(&*block.representation, &*new);
        let outcome = match comparison {
            Comparison::Equal => {
                block.finalized = true;
                debug!(
                    "Finalized block {address:#x} after {} generations",
                    block.generation
                );
                generator.release(address, new);
                CaptureOutcome::Finalized
            }
            Comparison::NewRaises => {
                debug!("Regenerated block {address:#x} raises an exception, keeping previous");
                generator.release(address, new);
                CaptureOutcome::KeptPrevious
            }
            Comparison::CountMismatch { old, new: new_count } => {
                debug!(
                    "Generations of block {address:#x} differ in size ({old} vs {new_count}), \
                     investigate"
                );
                Self::replace(block, address, new, generator)
            }
            Comparison::OldRaises | Comparison::BothRaise => {
                debug!("Replacing block {address:#x} after comparison {comparison:?}");
                Self::replace(block, address, new, generator)
            }
        };

        Ok(outcome)
    }

    /// Stores `new` as the representation of `block`, releasing the old one.
    fn replace(
        block: &mut CapturedBlock,
        address: Address,
        new: DynRepresentation,
        generator: &mut impl CodeGenerator,
    ) -> CaptureOutcome {
        let old = std::mem::replace(&mut block.representation, new);
        generator.release(address, old);
        block.generation += 1;

        CaptureOutcome::Replaced {
            generation: block.generation,
        }
    }

    /// Records the successor edge from `predecessor` to `address` in `log`.
    ///
    /// Returns `false` without touching `log` if `predecessor` is
    /// [`NO_ADDRESS`], or if no block has been captured at either end. A block
    /// whose capture failed therefore never appears in the successor graph.
    pub fn add_successor(
        &self,
        log: &mut TraceLog,
        predecessor: Address,
        address: Address,
    ) -> bool {
        if predecessor == NO_ADDRESS
            || !self.blocks.contains_key(&predecessor)
            || !self.blocks.contains_key(&address)
        {
            return false;
        }

        log.add_successor(predecessor, address);
        true
    }

    /// Stops regenerating blocks, treating every captured block as final from
    /// now on.
    pub fn stop_regenerating(&mut self) {
        if self.mode == CaptureMode::Regenerating {
            info!("Stopped regenerating captured blocks");
            self.mode = CaptureMode::Frozen;
        }
    }

    /// Gets the unit that every captured representation belongs to, once the
    /// first block has been captured.
    #[must_use]
    pub fn expected_unit(&self) -> Option<UnitId> {
        self.expected_unit
    }

    /// Gets the current capture mode.
    #[must_use]
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Takes the pending checkpoint, if one has come due since the last call.
    pub fn take_checkpoint(&mut self) -> bool {
        std::mem::take(&mut self.checkpoint_due)
    }

    /// Gets the capture state for the block at `address`.
    #[must_use]
    pub fn block(&self, address: Address) -> Option<&CapturedBlock> {
        self.blocks.get(&address)
    }

    /// Gets the representation held for the block at `address`.
    #[must_use]
    pub fn representation(&self, address: Address) -> Option<&DynRepresentation> {
        self.block(address).map(CapturedBlock::representation)
    }

    /// Checks if the block at `address` has been finalized.
    #[must_use]
    pub fn is_finalized(&self, address: Address) -> bool {
        self.block(address).is_some_and(CapturedBlock::is_finalized)
    }

    /// Gets the generation of the block at `address`, if it was captured.
    #[must_use]
    pub fn generation(&self, address: Address) -> Option<usize> {
        self.block(address).map(CapturedBlock::generation)
    }

    /// Gets the number of blocks that have been captured.
    #[must_use]
    pub fn captured_count(&self) -> usize {
        self.blocks.len()
    }

    /// Gets the number of captured blocks that have been finalized.
    #[must_use]
    pub fn finalized_count(&self) -> usize {
        self.blocks.values().filter(|b| b.finalized).count()
    }

    /// Gets summary statistics for the engine.
    #[must_use]
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captured:            self.captured_count(),
            finalized:           self.finalized_count(),
            successful_captures: self.successful_captures,
        }
    }
}

/// Checks that a representation owned by `found` may be captured when every
/// representation must belong to `expected`.
fn check_unit(expected: UnitId, found: UnitId, address: Address) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(Error::CrossModuleRepresentation { expected, found }.locate(address))
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use crate::{
        capture::{BlockCapture, CaptureMode, CaptureOutcome},
        error::capture::Error,
        generator::{BlockIr, CodeGenerator, DynRepresentation, Instruction},
        trace::TraceLog,
        Address,
    };

    /// A generator that hands out queued representations for each address.
    #[derive(Default)]
    struct Scripted {
        queued:   HashMap<Address, Vec<BlockIr>>,
        released: Vec<Address>,
    }

    impl Scripted {
        fn queue(&mut self, address: Address, ir: BlockIr) {
            self.queued.entry(address).or_default().push(ir);
        }

        fn next(&mut self, address: Address) -> Option<DynRepresentation> {
            let queue = self.queued.get_mut(&address)?;
            if queue.is_empty() {
                None
            } else {
                Some(queue.remove(0).in_rc())
            }
        }
    }

    impl CodeGenerator for Scripted {
        fn generate(&mut self, address: Address) -> Option<DynRepresentation> {
            self.next(address)
        }

        fn regenerate(
            &mut self,
            address: Address,
            _previous: &DynRepresentation,
        ) -> Option<DynRepresentation> {
            self.next(address)
        }

        fn release(&mut self, address: Address, _representation: DynRepresentation) {
            self.released.push(address);
        }
    }

    fn ir(count: usize) -> BlockIr {
        BlockIr::new(1).with_segment(vec![Instruction::Other; count])
    }

    fn raising(count: usize) -> BlockIr {
        let mut instructions = vec![Instruction::Other; count - 1];
        instructions.push(Instruction::call("helper_raise_exception"));
        BlockIr::new(1).with_segment(instructions)
    }

    #[test]
    fn first_capture_starts_at_generation_one() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(3));
        let mut capture = BlockCapture::new(true, 0);

        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::Captured);
        assert_eq!(capture.generation(0x10), Some(1));
        assert!(!capture.is_finalized(0x10));

        Ok(())
    }

    #[test]
    fn equal_regeneration_finalizes_and_keeps_the_old_generation() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(3));
        generator.queue(0x10, ir(3));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        let original = capture.representation(0x10).cloned().expect("Block was captured");
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::Finalized);

        assert!(capture.is_finalized(0x10));
        assert_eq!(capture.generation(0x10), Some(1));
        let held = capture.representation(0x10).expect("Block was captured");
        assert!(std::rc::Rc::ptr_eq(held, &original));
        assert_eq!(generator.released, vec![0x10]);

        Ok(())
    }

    #[test]
    fn finalized_blocks_stay_final() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(2));
        generator.queue(0x10, ir(2));
        generator.queue(0x10, ir(5));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        capture.capture(0x10, &mut generator)?;
        for _ in 0..3 {
            assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::CacheHit);
            assert!(capture.is_finalized(0x10));
        }

        // The queued differing generation was never requested.
        assert_eq!(generator.queued[&0x10].len(), 1);

        Ok(())
    }

    #[test]
    fn differing_regeneration_replaces_the_held_representation() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(2));
        generator.queue(0x10, ir(4));
        generator.queue(0x10, ir(4));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        assert_eq!(
            capture.capture(0x10, &mut generator)?,
            CaptureOutcome::Replaced { generation: 2 }
        );
        assert!(!capture.is_finalized(0x10));
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::Finalized);
        assert_eq!(capture.generation(0x10), Some(2));

        Ok(())
    }

    #[test]
    fn raising_regeneration_is_discarded() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(3));
        generator.queue(0x10, raising(3));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::KeptPrevious);
        assert_eq!(capture.generation(0x10), Some(1));
        assert!(!capture.is_finalized(0x10));

        Ok(())
    }

    #[test]
    fn raising_held_representation_is_replaced() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, raising(3));
        generator.queue(0x10, ir(3));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        assert_eq!(
            capture.capture(0x10, &mut generator)?,
            CaptureOutcome::Replaced { generation: 2 }
        );

        Ok(())
    }

    #[test]
    fn failed_regeneration_keeps_the_block() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        assert_eq!(
            capture.capture(0x10, &mut generator)?,
            CaptureOutcome::RegenerationFailed
        );
        assert!(capture.block(0x10).is_some());

        Ok(())
    }

    #[test]
    fn cross_unit_regeneration_is_fatal() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        generator.queue(0x10, BlockIr::new(2).with_segment(vec![Instruction::Other]));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        let error = capture
            .capture(0x10, &mut generator)
            .expect_err("Regeneration in another unit should fail");

        assert_eq!(error.location, 0x10);
        assert_eq!(
            error.payload,
            Error::CrossModuleRepresentation {
                expected: 1,
                found:    2,
            }
        );

        Ok(())
    }

    #[test]
    fn first_capture_in_another_unit_is_fatal() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        generator.queue(0x20, BlockIr::new(2).with_segment(vec![Instruction::Other]));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        assert_eq!(capture.expected_unit(), Some(1));
        let error = capture
            .capture(0x20, &mut generator)
            .expect_err("First capture in another unit should fail");

        assert_eq!(error.location, 0x20);
        assert_eq!(
            error.payload,
            Error::CrossModuleRepresentation {
                expected: 1,
                found:    2,
            }
        );
        assert!(capture.block(0x20).is_none());
        assert_eq!(generator.released, vec![0x20]);

        Ok(())
    }

    #[test]
    fn failed_capture_prevents_successors() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        let mut capture = BlockCapture::new(true, 0);
        let mut log = TraceLog::new();

        capture.capture(0x10, &mut generator)?;
        assert_eq!(capture.capture(0xdead, &mut generator)?, CaptureOutcome::Failed);
        assert!(!capture.add_successor(&mut log, 0x10, 0xdead));
        assert!(!capture.add_successor(&mut log, 0xdead, 0x10));
        assert!(log.successors().is_empty());

        Ok(())
    }

    #[test]
    fn successors_require_a_predecessor_and_a_captured_block() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        generator.queue(0x20, ir(1));
        let mut capture = BlockCapture::new(true, 0);
        let mut log = TraceLog::new();
        capture.capture(0x10, &mut generator)?;
        capture.capture(0x20, &mut generator)?;

        assert!(!capture.add_successor(&mut log, 0, 0x20));
        assert!(!capture.add_successor(&mut log, 0x10, 0x30));
        assert!(capture.add_successor(&mut log, 0x10, 0x20));
        assert!(capture.add_successor(&mut log, 0x10, 0x20));

        assert_eq!(log.successors().len(), 1);
        assert!(log.has_successor(0x10, 0x20));

        Ok(())
    }

    #[test]
    fn stopping_regeneration_turns_captures_into_cache_hits() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        generator.queue(0x10, ir(2));
        let mut capture = BlockCapture::new(true, 0);

        capture.capture(0x10, &mut generator)?;
        capture.stop_regenerating();
        capture.stop_regenerating();

        assert_eq!(capture.mode(), CaptureMode::Frozen);
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::CacheHit);
        assert!(!capture.is_finalized(0x10));

        Ok(())
    }

    #[test]
    fn disabled_regeneration_starts_frozen() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        generator.queue(0x10, ir(1));
        let mut capture = BlockCapture::new(false, 0);

        assert_eq!(capture.mode(), CaptureMode::Frozen);
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::Captured);
        assert_eq!(capture.capture(0x10, &mut generator)?, CaptureOutcome::CacheHit);

        Ok(())
    }

    #[test]
    fn checkpoint_comes_due_every_interval() -> anyhow::Result<()> {
        let mut generator = Scripted::default();
        for address in 1..=5 {
            generator.queue(address, ir(1));
        }
        let mut capture = BlockCapture::new(false, 2);

        let mut due = vec![];
        for address in 1..=5 {
            capture.capture(address, &mut generator)?;
            due.push(capture.take_checkpoint());
        }
        assert_eq!(due, vec![false, true, false, true, false]);

        // Failures do not count towards the interval.
        capture.capture(0x99, &mut generator)?;
        assert!(!capture.take_checkpoint());
        assert_eq!(capture.stats().successful_captures, 5);

        Ok(())
    }
}
