//! This module contains the [`Recorder`], the entry point that an execution
//! engine notifies about everything that happens in the monitored module.
//!
//! # Basic Usage
//!
//! ```
//! use trace_capture::{
//!     config::Config,
//!     generator::{BlockIr, CodeGenerator, DynRepresentation, Instruction},
//!     recorder::Recorder,
//!     sink::{MemorySink, RecordTag},
//!     tracker::ModuleDescriptor,
//!     Address,
//! };
//!
//! #[derive(Debug)]
//! struct Lifter;
//!
//! impl CodeGenerator for Lifter {
//!     fn generate(&mut self, _: Address) -> Option<DynRepresentation> {
//!         Some(BlockIr::new(1).with_segment(vec![Instruction::Other]).in_rc())
//!     }
//!
//!     fn regenerate(&mut self, address: Address, _: &DynRepresentation) -> Option<DynRepresentation> {
//!         self.generate(address)
//!     }
//! }
//!
//! let sink = MemorySink::new();
//! let mut recorder = Recorder::new(Config::default(), sink.clone());
//! let mut lifter = Lifter;
//!
//! recorder.module_loaded(&ModuleDescriptor::new("target", 1, 0x1000));
//! recorder.block_executed(0x1000, &mut lifter).unwrap();
//! recorder.block_executed(0x1010, &mut lifter).unwrap();
//!
//! let errors = recorder.finish();
//! assert!(errors.is_empty());
//!
//! let record = sink.latest(RecordTag::Final).unwrap();
//! assert_eq!(record.entries, vec![0x1000]);
//! assert_eq!(record.successors.len(), 1);
//! ```

use std::path::PathBuf;

use derivative::Derivative;
use tracing::{debug, info, warn};

use crate::{
    capture::{BlockCapture, CaptureOutcome},
    config::Config,
    cutoff::{DynCutoff, NeverCutoff},
    error::{self, persist, tracking, Errors},
    generator::CodeGenerator,
    sink::{DirectorySink, TraceSink},
    trace::TraceLog,
    tracker::{CallTracker, ModuleDescriptor, PathId, ReturnHook, ReturnOutcome},
    Address,
};

/// The recorder ties block capture and call tracking together behind the
/// notifications of an execution engine, and persists the resulting traces.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Recorder {
    /// The configuration the recorder was created with.
    config: Config,

    /// The capture state for every block, shared by all paths.
    #[derivative(Debug = "ignore")]
    capture: BlockCapture,

    /// The call tracker for the live path and its suspended siblings.
    tracker: CallTracker,

    /// Where traces are persisted.
    sink: Box<dyn TraceSink>,

    /// The cutoff polled to decide whether to stop regenerating.
    cutoff: DynCutoff,

    /// The number of successful captures since the cutoff was last polled.
    captures_since_poll: usize,

    /// The non-fatal errors encountered so far.
    errors: Errors,
}

impl Recorder {
    /// Constructs a recorder that persists its traces to `sink`.
    #[must_use]
    pub fn new(config: Config, sink: impl TraceSink + 'static) -> Self {
        let capture = BlockCapture::new(config.regeneration_enabled, config.checkpoint_interval);
        let tracker = CallTracker::new();
        let sink = Box::new(sink);
        let cutoff = NeverCutoff.in_rc();
        let captures_since_poll = 0;
        let errors = Errors::new();

        Self {
            config,
            capture,
            tracker,
            sink,
            cutoff,
            captures_since_poll,
            errors,
        }
    }

    /// Constructs a recorder that writes its traces into the configured
    /// output directory, or the current directory if there is none.
    #[must_use]
    pub fn with_directory_sink(config: Config) -> Self {
        let directory = config
            .output_directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(config, DirectorySink::new(directory))
    }

    /// Sets the cutoff that is polled to decide when to stop regenerating.
    #[must_use]
    pub fn with_cutoff(mut self, cutoff: DynCutoff) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Handles the monitored module being loaded.
    pub fn module_loaded(&mut self, module: &ModuleDescriptor) {
        self.tracker.on_module_enter(module);
    }

    /// Handles the block at `address` in the monitored module being executed
    /// on the live path, capturing it with `generator`.
    ///
    /// Returns `true` if a representation is held for the block afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the generator produced a representation belonging
    /// to a different unit than the one held for the block.
    pub fn block_executed(
        &mut self,
        address: Address,
        generator: &mut impl CodeGenerator,
    ) -> error::Result<bool> {
        let outcome = self.capture.capture(address, generator)?;
        if let CaptureOutcome::Replaced { generation } = outcome {
            debug!("Block {address:#x} is now at generation {generation}");
        }

        let predecessor = self.tracker.on_execute_block(address);
        self.capture
            .add_successor(self.tracker.trace_mut(), predecessor, address);

        if self.capture.take_checkpoint() {
            debug!("Checkpoint due after {address:#x}");
            let result = self.tracker.checkpoint(self.sink.as_mut());
            self.record_persistence(result);
        }

        if outcome.is_captured() {
            self.poll_cutoff();
        }

        Ok(outcome.is_captured())
    }

    /// Handles a call from `caller` to `callee`, where `source` and `dest` are
    /// the modules containing the two addresses if known.
    ///
    /// The returned hook, if any, must be handed back to
    /// [`Self::function_returned`] when the callee returns.
    pub fn function_called(
        &mut self,
        source: Option<&ModuleDescriptor>,
        dest: Option<&ModuleDescriptor>,
        caller: Address,
        callee: Address,
    ) -> Option<ReturnHook> {
        self.tracker.on_call(source, dest, caller, callee)
    }

    /// Handles the return of the call that armed `hook`, at `return_site`.
    pub fn function_returned(&mut self, hook: ReturnHook, return_site: Address) -> ReturnOutcome {
        self.tracker.on_return(hook, return_site)
    }

    /// Handles the live path `parent` forking into `children`.
    ///
    /// Returns the number of path snapshots stored.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `parent` is not the live path.
    pub fn path_forked(&mut self, parent: PathId, children: &[PathId]) -> error::Result<usize> {
        let live = self.tracker.live_path();
        if parent != live {
            return Err(tracking::Error::NotLivePath { path: parent, live }.into());
        }

        if self.config.freeze_on_fork {
            self.capture.stop_regenerating();
        }

        Ok(self.tracker.on_fork(children))
    }

    /// Handles the engine switching from the path `from` to the path `to`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `from` is not the live path or if no snapshot is
    /// stored for `to`.
    pub fn path_switched(&mut self, from: PathId, to: PathId) -> error::Result<()> {
        let outcome = self.tracker.on_switch(from, to, self.sink.as_mut())?;
        self.record_persistence(outcome.persisted);
        if outcome.released_stale {
            debug!("Released stale snapshot for path {from}");
        }

        Ok(())
    }

    /// Finishes recording, persisting the final trace of the live path and
    /// the traces of all suspended paths.
    ///
    /// Returns every non-fatal error encountered while recording.
    #[must_use]
    pub fn finish(mut self) -> Errors {
        let stats = self.capture.stats();
        info!(
            "Finished recording with {} captured blocks, of which {} are final",
            stats.captured, stats.finalized
        );

        let failures = self.tracker.finish(self.sink.as_mut());
        for failure in failures {
            self.record_persistence(Err(failure));
        }

        self.errors
    }

    /// Gets the configuration the recorder was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the block capture engine.
    #[must_use]
    pub fn capture(&self) -> &BlockCapture {
        &self.capture
    }

    /// Gets the call tracker.
    #[must_use]
    pub fn tracker(&self) -> &CallTracker {
        &self.tracker
    }

    /// Gets the trace of the live path.
    #[must_use]
    pub fn trace(&self) -> &TraceLog {
        self.tracker.trace()
    }

    /// Gets the non-fatal errors encountered so far.
    #[must_use]
    pub fn errors(&self) -> &Errors {
        &self.errors
    }

    /// Logs and buffers a failure to persist a trace.
    fn record_persistence(&mut self, result: persist::Result<()>) {
        if let Err(e) = result {
            warn!("{e}");
            self.errors.add(e.into());
        }
    }

    /// Polls the cutoff if enough captures have happened since it was last
    /// polled.
    fn poll_cutoff(&mut self) {
        self.captures_since_poll += 1;
        if self.captures_since_poll < self.cutoff.poll_every() {
            return;
        }
        self.captures_since_poll = 0;

        if self.cutoff.should_stop(&self.capture.stats()) {
            self.capture.stop_regenerating();
        }
    }
}
