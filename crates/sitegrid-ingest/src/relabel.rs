//! Dense machine index mappings between numbering spaces.

use sitegrid_store::{MachineIndex, PassTree};

use crate::error::{IngestError, Result};

/// Maps every index `0..len` of a source numbering to a target index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMapping {
    targets: Vec<MachineIndex>,
}

impl IndexMapping {
    /// Builds a mapping from per-source targets.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InconsistentIndexMapping`] if any source index
    /// has no target.
    pub fn from_targets(targets: impl IntoIterator<Item = Option<MachineIndex>>) -> Result<Self> {
        let mut dense = Vec::new();
        for (source, target) in targets.into_iter().enumerate() {
            let Some(target) = target else {
                return Err(IngestError::index_mapping(
                    format!("source machine {source} has no target"),
                    MachineIndex::try_from(source).ok(),
                ));
            };
            dense.push(target);
        }
        Ok(Self { targets: dense })
    }

    /// Number of mapped source indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// True if nothing is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets in source order.
    #[must_use]
    pub fn targets(&self) -> &[MachineIndex] {
        &self.targets
    }

    /// Target of `source`.
    #[must_use]
    pub fn get(&self, source: MachineIndex) -> Option<MachineIndex> {
        self.targets.get(usize::from(source)).copied()
    }

    /// Rewrites every pass of `tree` into the target numbering.
    ///
    /// The tree is left untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::InconsistentIndexMapping`] if a pass refers to
    /// an index outside the mapping.
    pub fn apply(&self, tree: &mut PassTree) -> Result<()> {
        if let Some(missing) = tree
            .machine_indices()
            .into_iter()
            .find(|index| self.get(*index).is_none())
        {
            return Err(IngestError::index_mapping(
                format!(
                    "pass refers to machine {missing}, mapping covers {}",
                    self.targets.len()
                ),
                Some(missing),
            ));
        }
        tree.remap_machines(|index| self.targets[usize::from(index)]);
        Ok(())
    }
}
