//! Existence map: which leaf tiles hold data.
//!
//! A two-level bitmask tree. The upper level is keyed by node coordinates
//! (leaf coordinates shifted down by five bits); each node holds a 32x32
//! bitmask of its leaves.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{SUB_GRID_TREE_DIMENSION, SUB_GRID_TREE_DIMENSION_SHIFT, SubGridKey};
use crate::bitmask::SubGridBitmask;

const NODE_MASK: u32 = SUB_GRID_TREE_DIMENSION - 1;

/// Sparse bitmask over leaf tiles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExistenceDocument", into = "ExistenceDocument")]
pub struct ExistenceMap {
    nodes: BTreeMap<(u32, u32), SubGridBitmask>,
}

fn split(key: SubGridKey) -> ((u32, u32), (u32, u32)) {
    let (lx, ly) = key.leaf_coords();
    (
        (lx >> SUB_GRID_TREE_DIMENSION_SHIFT, ly >> SUB_GRID_TREE_DIMENSION_SHIFT),
        (lx & NODE_MASK, ly & NODE_MASK),
    )
}

impl ExistenceMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the leaf at `key` as present.
    pub fn set(&mut self, key: SubGridKey) {
        let (node, (x, y)) = split(key);
        self.nodes.entry(node).or_default().set(x, y);
    }

    /// Clears the leaf at `key`.
    pub fn clear(&mut self, key: SubGridKey) {
        let (node, (x, y)) = split(key);
        if let Some(mask) = self.nodes.get_mut(&node) {
            mask.clear(x, y);
            if mask.is_empty() {
                self.nodes.remove(&node);
            }
        }
    }

    /// True if the leaf at `key` is present.
    #[must_use]
    pub fn contains(&self, key: SubGridKey) -> bool {
        let (node, (x, y)) = split(key);
        self.nodes.get(&node).is_some_and(|mask| mask.get(x, y))
    }

    /// Adds every leaf of `other`.
    pub fn union_with(&mut self, other: &Self) {
        for (node, mask) in &other.nodes {
            let entry = self.nodes.entry(*node).or_default();
            *entry = entry.or(mask);
        }
    }

    /// Returns the leaves of `self` absent from `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        let mut nodes = BTreeMap::new();
        for (node, mask) in &self.nodes {
            let diff = match other.nodes.get(node) {
                Some(o) => mask.and_not(o),
                None => *mask,
            };
            if !diff.is_empty() {
                nodes.insert(*node, diff);
            }
        }
        Self { nodes }
    }

    /// Number of present leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.values().map(|m| m.count() as usize).sum()
    }

    /// True if no leaf is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates present leaves in node order.
    pub fn iter(&self) -> impl Iterator<Item = SubGridKey> + '_ {
        self.nodes.iter().flat_map(|(&(nx, ny), mask)| {
            mask.iter_set().map(move |(x, y)| {
                SubGridKey::from_leaf_coords(
                    (nx << SUB_GRID_TREE_DIMENSION_SHIFT) | x,
                    (ny << SUB_GRID_TREE_DIMENSION_SHIFT) | y,
                )
            })
        })
    }
}

impl FromIterator<SubGridKey> for ExistenceMap {
    fn from_iter<I: IntoIterator<Item = SubGridKey>>(iter: I) -> Self {
        let mut map = Self::new();
        for key in iter {
            map.set(key);
        }
        map
    }
}

/// Persisted form of an [`ExistenceMap`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistenceDocument {
    nodes: Vec<ExistenceNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExistenceNode {
    x: u32,
    y: u32,
    mask: SubGridBitmask,
}

impl From<ExistenceDocument> for ExistenceMap {
    fn from(doc: ExistenceDocument) -> Self {
        Self {
            nodes: doc
                .nodes
                .into_iter()
                .filter(|n| !n.mask.is_empty())
                .map(|n| ((n.x, n.y), n.mask))
                .collect(),
        }
    }
}

impl From<ExistenceMap> for ExistenceDocument {
    fn from(map: ExistenceMap) -> Self {
        Self {
            nodes: map
                .nodes
                .into_iter()
                .map(|((x, y), mask)| ExistenceNode { x, y, mask })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_contains_iter() {
        let mut map = ExistenceMap::new();
        let near = SubGridKey::containing(2, 2);
        let far = SubGridKey::containing(40_000, 70_000);
        map.set(near);
        map.set(far);

        assert!(map.contains(near));
        assert!(map.contains(far));
        assert!(!map.contains(SubGridKey::containing(32, 0)));
        assert_eq!(map.len(), 2);
        let keys: Vec<_> = map.iter().collect();
        assert!(keys.contains(&near) && keys.contains(&far));
    }

    #[test]
    fn test_difference_and_clear() {
        let a: ExistenceMap = [SubGridKey::containing(0, 0), SubGridKey::containing(64, 0)]
            .into_iter()
            .collect();
        let b: ExistenceMap = std::iter::once(SubGridKey::containing(0, 0)).collect();

        let delta = a.difference(&b);
        assert_eq!(delta.iter().collect::<Vec<_>>(), vec![SubGridKey::containing(64, 0)]);

        let mut c = a.clone();
        c.clear(SubGridKey::containing(64, 0));
        assert_eq!(c, b);
    }

    #[test]
    fn test_json_document_roundtrip() {
        let map: ExistenceMap = std::iter::once(SubGridKey::containing(5_000, 9)).collect();
        let json = serde_json::to_string(&map).unwrap();
        let back: ExistenceMap = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }
}
