//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use std::collections::{HashMap, VecDeque};

use trace_capture::{
    config::Config,
    generator::{BlockIr, CodeGenerator, DynRepresentation, Instruction},
    logging,
    sink::MemorySink,
    tracker::ModuleDescriptor,
    Address,
    Recorder,
};

/// The unit that every block of the monitored module belongs to.
#[allow(unused)] // It is actually
pub const UNIT: u64 = 1;

/// Gets the descriptor of the monitored module used throughout the tests.
#[allow(unused)] // It is actually
pub fn module() -> ModuleDescriptor {
    ModuleDescriptor::new("target", 42, 0x1000)
}

/// Gets the descriptor of a library module that is not monitored.
#[allow(unused)] // It is actually
pub fn library() -> ModuleDescriptor {
    ModuleDescriptor::new("libc.so.6", 42, 0x7f00_0000)
}

/// Constructs a recorder for [`module`] that persists into a shared memory
/// sink, returning both.
#[allow(unused)] // It is actually
pub fn new_recorder(config: Config) -> anyhow::Result<(Recorder, MemorySink)> {
    logging::initialize_logging(None)?;

    let sink = MemorySink::new();
    let mut recorder = trace_capture::new(config, sink.clone());
    recorder.module_loaded(&module());

    Ok((recorder, sink))
}

/// Constructs a block whose last segment holds `count` plain instructions.
#[allow(unused)] // It is actually
pub fn plain_block(count: usize) -> BlockIr {
    BlockIr::new(UNIT).with_segment(vec![Instruction::Other; count])
}

/// Constructs a block whose last segment ends by raising an exception.
#[allow(unused)] // It is actually
pub fn raising_block(count: usize) -> BlockIr {
    let mut instructions = vec![Instruction::Other; count.saturating_sub(1)];
    instructions.push(Instruction::call("helper_raise_exception"));
    BlockIr::new(UNIT).with_segment(instructions)
}

/// A code generator that hands out pre-scripted representations per address,
/// falling back to a single-instruction block once an address's script runs
/// out.
///
/// Addresses listed as failing never produce a representation.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    scripts:  HashMap<Address, VecDeque<BlockIr>>,
    failing:  Vec<Address>,
    released: Vec<Address>,
}

#[allow(unused)] // It is actually
impl ScriptedGenerator {
    /// Constructs a generator with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the successive representations generated for `address`.
    pub fn script(mut self, address: Address, blocks: impl IntoIterator<Item = BlockIr>) -> Self {
        self.scripts.entry(address).or_default().extend(blocks);
        self
    }

    /// Makes every generation for `address` fail.
    pub fn failing(mut self, address: Address) -> Self {
        self.failing.push(address);
        self
    }

    /// Gets the addresses whose representations were released, in order.
    pub fn released(&self) -> &[Address] {
        &self.released
    }

    fn next(&mut self, address: Address) -> Option<DynRepresentation> {
        if self.failing.contains(&address) {
            return None;
        }

        let block = self
            .scripts
            .get_mut(&address)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| plain_block(1));
        Some(block.in_rc())
    }
}

impl CodeGenerator for ScriptedGenerator {
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
