//! This module contains the [`TraceLog`], the aggregate of everything the
//! recorder learns about the structure of the traced program along a single
//! execution path.
//!
//! The log is insertion-only while a path runs. It is cloned wholesale when a
//! path forks and replaced wholesale when the engine switches paths, so it
//! owns all of its data and shares nothing with other logs.

pub mod record;

use std::collections::{BTreeMap, BTreeSet};

pub use record::{Successor, TraceRecord};

use crate::{constant::NO_ADDRESS, data::EdgeMap, Address};

/// The structural trace of one execution path.
///
/// # Invariants
///
/// - `entries` is never empty.
/// - Only the last element of `entries` may be the sentinel [`NO_ADDRESS`],
///   which means that the log is waiting to learn the next top-level entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TraceLog {
    /// The `(predecessor, block)` control-flow edges.
    successors: BTreeSet<(Address, Address)>,

    /// The blocks executed while each frame was the top of the call stack.
    blocks_by_frame: EdgeMap,

    /// The callers of each function that has returned.
    entry_to_caller: EdgeMap,

    /// The last block executed before each function returned.
    entry_to_return_site: EdgeMap,

    /// The first block executed after a call from each caller resolved.
    caller_to_follow_up: EdgeMap,

    /// The top-level entries, possibly ending in the sentinel.
    entries: Vec<Address>,
}

impl TraceLog {
    /// Constructs a new, empty, trace log that is waiting for its first
    /// top-level entry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            successors:           BTreeSet::new(),
            blocks_by_frame:      EdgeMap::new(),
            entry_to_caller:      EdgeMap::new(),
            entry_to_return_site: EdgeMap::new(),
            caller_to_follow_up:  EdgeMap::new(),
            entries:              vec![NO_ADDRESS],
        }
    }

    /// Records the control-flow edge from `predecessor` to `block`.
    ///
    /// Returns `true` if the edge was not already present.
    pub fn add_successor(&mut self, predecessor: Address, block: Address) -> bool {
        self.successors.insert((predecessor, block))
    }

    /// Records that `block` was executed while `frame` was the top of the call
    /// stack.
    pub fn record_block(&mut self, frame: Address, block: Address) {
        self.blocks_by_frame.insert(frame, block);
    }

    /// Records that the function at `entry` returned to `caller`, with
    /// `return_site` being the last block it executed.
    pub fn record_return(&mut self, entry: Address, caller: Address, return_site: Address) {
        self.entry_to_caller.insert(entry, caller);
        self.entry_to_return_site.insert(entry, return_site);
    }

    /// Records that `block` was the first block executed after a call made by
    /// `caller` resolved.
    pub fn record_follow_up(&mut self, caller: Address, block: Address) {
        self.caller_to_follow_up.insert(caller, block);
    }

    /// Checks whether the log is waiting to learn the next top-level entry.
    #[must_use]
    pub fn sentinel_active(&self) -> bool {
        self.entries.last() == Some(&NO_ADDRESS)
    }

    /// Gets the most recent top-level entry, which is [`NO_ADDRESS`] if the
    /// sentinel is active.
    #[must_use]
    pub fn last_entry(&self) -> Address {
        self.entries.last().copied().unwrap_or(NO_ADDRESS)
    }

    /// Replaces the active sentinel with `entry`.
    ///
    /// Returns `false`, leaving the log unchanged, if the sentinel was not
    /// active or `entry` is [`NO_ADDRESS`].
    pub fn resolve_sentinel(&mut self, entry: Address) -> bool {
        if entry == NO_ADDRESS || !self.sentinel_active() {
            return false;
        }
        if let Some(last) = self.entries.last_mut() {
            *last = entry;
        }
        true
    }

    /// Appends the sentinel so that the next top-level invocation is recorded
    /// as a new entry.
    ///
    /// Does nothing if the sentinel is already active.
    pub fn push_sentinel(&mut self) {
        if !self.sentinel_active() {
            self.entries.push(NO_ADDRESS);
        }
    }

    /// Removes a trailing sentinel, as long as doing so would not leave the
    /// entries empty.
    ///
    /// Returns `true` if a sentinel was removed.
    pub fn pop_sentinel(&mut self) -> bool {
        if self.sentinel_active() && self.entries.len() > 1 {
            self.entries.pop();
            true
        } else {
            false
        }
    }

    /// Gets the top-level entries.
    #[must_use]
    pub fn entries(&self) -> &[Address] {
        &self.entries
    }

    /// Checks whether the edge from `predecessor` to `block` has been
    /// recorded.
    #[must_use]
    pub fn has_successor(&self, predecessor: Address, block: Address) -> bool {
        self.successors.contains(&(predecessor, block))
    }

    /// Gets all of the recorded control-flow edges.
    #[must_use]
    pub fn successors(&self) -> &BTreeSet<(Address, Address)> {
        &self.successors
    }

    /// Gets the blocks executed under each frame.
    #[must_use]
    pub fn blocks_by_frame(&self) -> &EdgeMap {
        &self.blocks_by_frame
    }

    /// Gets the callers of each function that has returned.
    #[must_use]
    pub fn entry_to_caller(&self) -> &EdgeMap {
        &self.entry_to_caller
    }

    /// Gets the return sites of each function that has returned.
    #[must_use]
    pub fn entry_to_return_site(&self) -> &EdgeMap {
        &self.entry_to_return_site
    }

    /// Gets the follow-up blocks for each caller.
    #[must_use]
    pub fn caller_to_follow_up(&self) -> &EdgeMap {
        &self.caller_to_follow_up
    }

    /// Replaces the entire contents of the log with `snapshot`.
    pub fn restore_from(&mut self, snapshot: TraceLog) {
        *self = snapshot;
    }

    /// Merges the contents of `other` into `self`.
    ///
    /// All edges are unioned. Entries of `other` that `self` has not seen are
    /// appended in their original order, and a sentinel remains only at the
    /// end of the merged entries if `self` was waiting for an entry.
    pub fn merge(&mut self, other: &TraceLog) {
        self.successors.extend(other.successors.iter().copied());
        self.blocks_by_frame.merge(&other.blocks_by_frame);
        self.entry_to_caller.merge(&other.entry_to_caller);
        self.entry_to_return_site.merge(&other.entry_to_return_site);
        self.caller_to_follow_up.merge(&other.caller_to_follow_up);

        let waiting = self.sentinel_active();
        let mut entries: Vec<Address> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter().chain(other.entries.iter()) {
            if *entry != NO_ADDRESS && !entries.contains(entry) {
                entries.push(*entry);
            }
        }
        if waiting || entries.is_empty() {
            entries.push(NO_ADDRESS);
        }
        self.entries = entries;
    }

    /// Converts the log into its persisted form.
    #[must_use]
    pub fn to_record(&self) -> TraceRecord {
        fn flatten(map: &EdgeMap) -> BTreeMap<Address, Vec<Address>> {
            map.iter()
                .map(|(source, targets)| (source, targets.iter().copied().collect()))
                .collect()
        }

        TraceRecord {
            entries:              self.entries.clone(),
            successors:           self
                .successors
                .iter()
                .map(|(from, to)| Successor::new(*from, *to))
                .collect(),
            blocks_by_frame:      flatten(&self.blocks_by_frame),
            entry_to_caller:      flatten(&self.entry_to_caller),
            entry_to_return_site: flatten(&self.entry_to_return_site),
            caller_to_follow_up:  flatten(&self.caller_to_follow_up),
        }
    }

    /// Reconstructs a log from its persisted form.
    ///
    /// Sentinels anywhere but the end of the entries are dropped, and an empty
    /// entry list becomes a lone sentinel, so that the result always upholds
    /// the log's invariants.
    #[must_use]
    pub fn from_record(record: &TraceRecord) -> Self {
        fn expand(map: &BTreeMap<Address, Vec<Address>>) -> EdgeMap {
            map.iter()
                .flat_map(|(source, targets)| targets.iter().map(move |t| (*source, *t)))
                .collect()
        }

        let waiting = record.entries.last() == Some(&NO_ADDRESS);
        let mut entries: Vec<Address> = record
            .entries
            .iter()
            .copied()
            .filter(|entry| *entry != NO_ADDRESS)
            .collect();
        if waiting || entries.is_empty() {
            entries.push(NO_ADDRESS);
        }

        Self {
            successors: record.successors.iter().map(|s| (s.from, s.to)).collect(),
            blocks_by_frame: expand(&record.blocks_by_frame),
            entry_to_caller: expand(&record.entry_to_caller),
            entry_to_return_site: expand(&record.entry_to_return_site),
            caller_to_follow_up: expand(&record.caller_to_follow_up),
            entries,
        }
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&TraceLog> for TraceRecord {
    fn from(value: &TraceLog) -> Self {
        value.to_record()
    }
}

#[cfg(test)]
mod test {
    use crate::{
        constant::NO_ADDRESS,
        trace::{Successor, TraceLog, TraceRecord},
    };

    #[test]
    fn new_log_awaits_its_first_entry() {
        let log = TraceLog::new();

        assert_eq!(log.entries(), &[NO_ADDRESS]);
        assert!(log.sentinel_active());
        assert_eq!(log.last_entry(), NO_ADDRESS);
    }

    #[test]
    fn sentinel_is_resolved_and_rearmed() {
        let mut log = TraceLog::new();
        assert!(log.resolve_sentinel(0x1000));
        assert!(!log.resolve_sentinel(0x2000));
        assert_eq!(log.entries(), &[0x1000]);

        log.push_sentinel();
        log.push_sentinel();
        assert_eq!(log.entries(), &[0x1000, NO_ADDRESS]);

        assert!(log.pop_sentinel());
        assert!(!log.pop_sentinel());
        assert_eq!(log.entries(), &[0x1000]);
    }

    #[test]
    fn lone_sentinel_is_never_popped() {
        let mut log = TraceLog::new();
        assert!(!log.pop_sentinel());
        assert_eq!(log.entries(), &[NO_ADDRESS]);
    }

    #[test]
    fn restoring_a_snapshot_undoes_later_mutation() {
        let mut log = TraceLog::new();
        log.resolve_sentinel(0x1000);
        log.record_block(0x1000, 0x1000);
        log.add_successor(0x1000, 0x1010);
        let snapshot = log.clone();

        log.record_block(0x1000, 0x1020);
        log.record_return(0x2000, 0x1000, 0x2008);
        log.record_follow_up(0x1000, 0x1030);
        log.push_sentinel();
        assert_ne!(log, snapshot);

        log.restore_from(snapshot.clone());
        assert_eq!(log, snapshot);
    }

    #[test]
    fn record_has_the_expected_shape() -> anyhow::Result<()> {
        let mut log = TraceLog::new();
        log.resolve_sentinel(0x1000);
        log.add_successor(0x1000, 0x1010);
        log.record_block(0x1000, 0x1010);
        log.record_return(0x2000, 0x1000, 0x2004);
        log.record_follow_up(0x1000, 0x1010);
        log.push_sentinel();

        let json = serde_json::to_value(log.to_record())?;
        assert_eq!(
            json,
            serde_json::json!({
                "entries": [4096, 0],
                "successors": [{ "from": 4096, "to": 4112 }],
                "blocksByFrame": { "4096": [4112] },
                "entryToCaller": { "8192": [4096] },
                "entryToReturnSite": { "8192": [8196] },
                "callerToFollowUp": { "4096": [4112] },
            })
        );

        Ok(())
    }

    #[test]
    fn record_converts_back_to_an_equal_log() {
        let mut log = TraceLog::new();
        log.resolve_sentinel(0x40);
        log.record_return(0x80, 0x40, 0x88);
        log.add_successor(0x40, 0x44);

        let record = TraceRecord::from(&log);
        assert_eq!(record.successors, vec![Successor::new(0x40, 0x44)]);
        assert_eq!(TraceLog::from_record(&record), log);
    }

    #[test]
    fn malformed_record_entries_are_repaired() {
        let record = TraceRecord {
            entries: vec![0, 0x10, 0],
            ..TraceRecord::default()
        };
        assert_eq!(TraceLog::from_record(&record).entries(), &[0x10, NO_ADDRESS]);

        let empty = TraceRecord::default();
        assert_eq!(TraceLog::from_record(&empty).entries(), &[NO_ADDRESS]);
    }

    #[test]
    fn merging_unions_edges_and_appends_new_entries() {
        let mut left = TraceLog::new();
        left.resolve_sentinel(0x10);
        left.add_successor(0x10, 0x14);
        left.record_block(0x10, 0x14);

        let mut right = TraceLog::new();
        right.resolve_sentinel(0x10);
        right.push_sentinel();
        right.resolve_sentinel(0x20);
        right.add_successor(0x20, 0x24);
        right.record_block(0x10, 0x18);

        left.merge(&right);

        assert_eq!(left.entries(), &[0x10, 0x20]);
        assert!(left.has_successor(0x10, 0x14));
        assert!(left.has_successor(0x20, 0x24));
        assert_eq!(left.blocks_by_frame().targets(0x10), vec![0x14, 0x18]);
    }
}
