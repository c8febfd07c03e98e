//! This module contains the durable schema for a flushed trace.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Address;

/// A single control-flow edge from the block at `from` to the block at `to`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Successor {
    pub from: Address,
    pub to:   Address,
}

impl Successor {
    /// Constructs a new successor edge.
    #[must_use]
    pub fn new(from: Address, to: Address) -> Self {
        Self { from, to }
    }
}

/// The persisted form of a [`super::TraceLog`].
///
/// Addresses are plain integers. Map keys become decimal strings in JSON, and
/// every list is sorted in ascending order.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    /// The top-level entries in the order they were first executed.
    ///
    /// The last element may be `0`, meaning that the trace was awaiting the
    /// next top-level entry when it was flushed.
    pub entries: Vec<Address>,

    /// The control-flow edges between captured blocks.
    pub successors: Vec<Successor>,

    /// For each frame, the blocks executed while it was on top of the call
    /// stack.
    pub blocks_by_frame: BTreeMap<Address, Vec<Address>>,

    /// For each returning function, the addresses of its callers.
    pub entry_to_caller: BTreeMap<Address, Vec<Address>>,

    /// For each returning function, the last block executed before the return.
    pub entry_to_return_site: BTreeMap<Address, Vec<Address>>,

    /// For each caller, the first block executed after the call resolved.
    pub caller_to_follow_up: BTreeMap<Address, Vec<Address>>,
}

impl TraceRecord {
    /// Renders the record as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if serialization fails.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Parses a record from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if `json` is not a valid record.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
