//! This module contains the definition of a multimap from one code address to
//! a set of code addresses, used for every kind of edge the trace records.

use std::collections::{btree_map, BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Address;

/// A multimap from a source address to the set of addresses related to it.
///
/// Inserting the same `(source, target)` pair more than once has no effect, and
/// both sources and targets are kept in ascending order so that serialized
/// output is deterministic.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EdgeMap {
    edges: BTreeMap<Address, BTreeSet<Address>>,
}

impl EdgeMap {
    /// Creates a new, empty, `EdgeMap`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the edge from `source` to `target`.
    ///
    /// Returns `true` if the edge was not already present.
    pub fn insert(&mut self, source: Address, target: Address) -> bool {
        self.edges.entry(source).or_default().insert(target)
    }

    /// Gets the set of targets for `source`, or [`None`] if there are no edges
    /// from `source`.
    #[must_use]
    pub fn get(&self, source: Address) -> Option<&BTreeSet<Address>> {
        self.edges.get(&source)
    }

    /// Checks if the edge from `source` to `target` is present.
    #[must_use]
    pub fn contains(&self, source: Address, target: Address) -> bool {
        self.get(source).is_some_and(|targets| targets.contains(&target))
    }

    /// Gets the targets of `source` as a sorted vector, which is empty if there
    /// are no edges from `source`.
    #[must_use]
    pub fn targets(&self, source: Address) -> Vec<Address> {
        self.get(source)
            .map(|targets| targets.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Gets the number of distinct sources in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Gets the total number of edges in the map.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// Checks whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Inserts every edge of `other` into `self`.
    pub fn merge(&mut self, other: &Self) {
        for (source, targets) in other.iter() {
            self.edges
                .entry(source)
                .or_default()
                .extend(targets.iter().copied());
        }
    }

    /// An iterator visiting all sources and their targets in ascending source
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &BTreeSet<Address>)> {
        self.edges.iter().map(|(source, targets)| (*source, targets))
    }
}

impl IntoIterator for EdgeMap {
    type IntoIter = btree_map::IntoIter<Address, BTreeSet<Address>>;
    type Item = (Address, BTreeSet<Address>);

    fn into_iter(self) -> Self::IntoIter {
        self.edges.into_iter()
    }
}

impl FromIterator<(Address, Address)> for EdgeMap {
    fn from_iter<T: IntoIterator<Item = (Address, Address)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (source, target) in iter {
            map.insert(source, target);
        }
        map
    }
}

#[cfg(test)]
mod test {
    use crate::data::EdgeMap;

    #[test]
    fn duplicate_edges_collapse() {
        let mut map = EdgeMap::new();
        assert!(map.insert(0x10, 0x20));
        assert!(!map.insert(0x10, 0x20));
        map.insert(0x10, 0x18);

        assert_eq!(map.len(), 1);
        assert_eq!(map.edge_count(), 2);
        assert_eq!(map.targets(0x10), vec![0x18, 0x20]);
        assert!(map.targets(0x30).is_empty());
    }

    #[test]
    fn can_merge_maps() {
        let mut left: EdgeMap = [(1, 2), (1, 3)].into_iter().collect();
        let right: EdgeMap = [(1, 3), (4, 5)].into_iter().collect();
        left.merge(&right);

        assert_eq!(left.edge_count(), 3);
        assert!(left.contains(4, 5));
        assert!(left.contains(1, 2));
    }

    #[test]
    fn serializes_as_an_object_of_lists() -> anyhow::Result<()> {
        let map: EdgeMap = [(0x2000, 0x1000)].into_iter().collect();
        let json = serde_json::to_value(&map)?;

        assert_eq!(json, serde_json::json!({ "8192": [4096] }));
        let back: EdgeMap = serde_json::from_value(json)?;
        assert_eq!(back, map);

        Ok(())
    }
}
