//! Spatial trees: the transient pass tree built per aggregation task and
//! the live store of published leaf tiles.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::address::{CELLS_PER_SUB_GRID, CellAddress, SubGridKey, cell_index};
use crate::cell_pass::{CellPass, MachineIndex};
use crate::existence::ExistenceMap;
use crate::leaf::LeafSubGrid;

/// Cell-pass stacks of one transient leaf, indexed by cell.
#[derive(Debug, Clone, PartialEq)]
pub struct PassLeaf {
    stacks: Vec<Vec<CellPass>>,
}

impl Default for PassLeaf {
    fn default() -> Self {
        Self {
            stacks: vec![Vec::new(); CELLS_PER_SUB_GRID],
        }
    }
}

impl PassLeaf {
    /// Stacks indexed by cell, unsorted.
    #[must_use]
    pub fn stacks(&self) -> &[Vec<CellPass>] {
        &self.stacks
    }

    /// Number of passes held.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.stacks.iter().map(Vec::len).sum()
    }
}

/// A sparse tree of not-yet-integrated cell passes.
///
/// Produced upstream per decoded TAG file and merged pairwise when several
/// tasks target one site model. Machine indices refer to whatever numbering
/// the producer used until [`PassTree::remap_machines`] rewrites them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassTree {
    leaves: BTreeMap<SubGridKey, PassLeaf>,
}

impl PassTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pass at `cell`.
    pub fn add_pass(&mut self, cell: CellAddress, pass: CellPass) {
        let (x, y) = cell.local();
        self.leaves.entry(cell.leaf()).or_default().stacks[cell_index(x, y)].push(pass);
    }

    /// Moves every pass of `other` into this tree.
    pub fn absorb(&mut self, other: Self) {
        for (key, leaf) in other.leaves {
            match self.leaves.get_mut(&key) {
                Some(target) => {
                    for (stack, incoming) in target.stacks.iter_mut().zip(leaf.stacks) {
                        stack.extend(incoming);
                    }
                }
                None => {
                    self.leaves.insert(key, leaf);
                }
            }
        }
    }

    /// Rewrites every pass's machine index through `map`.
    pub fn remap_machines(&mut self, map: impl Fn(MachineIndex) -> MachineIndex) {
        for leaf in self.leaves.values_mut() {
            for pass in leaf.stacks.iter_mut().flatten() {
                pass.internal_machine_index = map(pass.internal_machine_index);
            }
        }
    }

    /// Distinct machine indices referenced by any pass.
    #[must_use]
    pub fn machine_indices(&self) -> Vec<MachineIndex> {
        let mut seen: Vec<MachineIndex> = self
            .leaves
            .values()
            .flat_map(|leaf| leaf.stacks.iter().flatten())
            .map(|p| p.internal_machine_index)
            .collect();
        seen.sort_unstable();
        seen.dedup();
        seen
    }

    /// Leaves in key order.
    pub fn leaves(&self) -> impl Iterator<Item = (SubGridKey, &PassLeaf)> {
        self.leaves.iter().map(|(k, v)| (*k, v))
    }

    /// Number of leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Number of passes.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.leaves.values().map(PassLeaf::pass_count).sum()
    }

    /// True if the tree holds no passes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pass_count() == 0
    }

    /// Leaf keys as an existence map.
    #[must_use]
    pub fn existence(&self) -> ExistenceMap {
        self.leaves.keys().copied().collect()
    }
}

/// Published leaf tiles of a live site model.
///
/// Each leaf sits in its own slot; publishing swaps the slot's snapshot, so
/// a reader holding an `Arc<LeafSubGrid>` keeps a consistent tile while an
/// ingest replaces it.
#[derive(Debug, Default)]
pub struct SpatialStore {
    slots: RwLock<HashMap<SubGridKey, Arc<RwLock<Arc<LeafSubGrid>>>>>,
}

impl SpatialStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current snapshot of the leaf at `key`.
    #[must_use]
    pub fn get(&self, key: SubGridKey) -> Option<Arc<LeafSubGrid>> {
        let slot = self.slots.read().get(&key).cloned()?;
        let leaf = slot.read().clone();
        Some(leaf)
    }

    /// Publishes a new snapshot of a leaf.
    pub fn publish(&self, leaf: Arc<LeafSubGrid>) {
        let key = leaf.key();
        let existing = self.slots.read().get(&key).cloned();
        match existing {
            Some(slot) => *slot.write() = leaf,
            None => {
                self.slots
                    .write()
                    .entry(key)
                    .and_modify(|slot| *slot.write() = Arc::clone(&leaf))
                    .or_insert_with(|| Arc::new(RwLock::new(leaf)));
            }
        }
    }

    /// Keys of every published leaf, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<SubGridKey> {
        let mut keys: Vec<_> = self.slots.read().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of published leaves.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// True if no leaf is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}
