//! Design names and the design-elevation lookup boundary.
//!
//! Design surfaces themselves (TIN evaluation) live outside this crate; the
//! store only consumes per-tile elevation samples through
//! [`DesignElevationLookup`].

use serde::{Deserialize, Serialize};
use sitegrid_core::{DesignUid, SiteModelId};

use crate::address::{CELLS_PER_SUB_GRID, SubGridKey, cell_index};

/// Dense id of a design name within one site model.
pub type DesignNameId = i32;

/// One design name known to a site model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignNameEntry {
    /// Site-model-local id.
    pub id: DesignNameId,
    /// Name as reported by machines.
    pub name: String,
}

/// Design names reported by machines, with site-model-local ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignNameTable {
    entries: Vec<DesignNameEntry>,
}

impl DesignNameTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `name`, if known.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<DesignNameId> {
        self.entries.iter().find(|e| e.name == name).map(|e| e.id)
    }

    /// Name with id `id`, if known.
    #[must_use]
    pub fn name_of(&self, id: DesignNameId) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| e.name.as_str())
    }

    /// Returns the id of `name`, adding it if new. The flag is true when
    /// the name was added.
    pub fn get_or_insert(&mut self, name: &str) -> (DesignNameId, bool) {
        if let Some(id) = self.id_of(name) {
            return (id, false);
        }
        let id = self.entries.iter().map(|e| e.id + 1).max().unwrap_or(0);
        self.entries.push(DesignNameEntry {
            id,
            name: name.to_string(),
        });
        (id, true)
    }

    /// Number of names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reference to a design surface with a vertical offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesignRef {
    /// Design identity.
    pub design: DesignUid,
    /// Vertical offset in metres applied to every sample.
    pub offset: f64,
}

/// Elevation samples for one tile; `None` where the design has no surface.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightGrid {
    origin: SubGridKey,
    cells: Vec<Option<f32>>,
}

impl HeightGrid {
    /// A grid with no samples.
    #[must_use]
    pub fn empty(origin: SubGridKey) -> Self {
        Self {
            origin,
            cells: vec![None; CELLS_PER_SUB_GRID],
        }
    }

    /// A grid with every cell at `height`.
    #[must_use]
    pub fn filled(origin: SubGridKey, height: f32) -> Self {
        Self {
            origin,
            cells: vec![Some(height); CELLS_PER_SUB_GRID],
        }
    }

    /// Tile origin.
    #[must_use]
    pub const fn origin(&self) -> SubGridKey {
        self.origin
    }

    /// Sample at local `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        self.cells[cell_index(x, y)]
    }

    /// Sets the sample at local `(x, y)`.
    pub fn set(&mut self, x: u32, y: u32, height: Option<f32>) {
        self.cells[cell_index(x, y)] = height;
    }
}

/// Status reported by a failed design lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DesignLookupError {
    /// The design is not known.
    #[error("design does not exist")]
    DesignDoesNotExist,
    /// The design does not cover the requested tile.
    #[error("no elevations in requested patch")]
    NoElevationsInRequestedPatch,
    /// The lookup failed for another reason.
    #[error("design lookup failed: {0}")]
    Failed(String),
}

/// External capability returning design elevations per tile.
pub trait DesignElevationLookup: Send + Sync {
    /// Returns elevation samples of `design` (plus `offset`) for the tile at
    /// `origin`.
    ///
    /// # Errors
    ///
    /// Returns the lookup status when no samples can be produced.
    fn design_heights(
        &self,
        site_model: SiteModelId,
        design: &DesignRef,
        offset: f64,
        origin: SubGridKey,
        cell_size: f64,
    ) -> Result<HeightGrid, DesignLookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_insert_is_stable() {
        let mut table = DesignNameTable::new();
        assert_eq!(table.get_or_insert("base"), (0, true));
        assert_eq!(table.get_or_insert("subgrade"), (1, true));
        assert_eq!(table.get_or_insert("base"), (0, false));
        assert_eq!(table.name_of(1), Some("subgrade"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_height_grid_samples() {
        let mut grid = HeightGrid::filled(SubGridKey::containing(0, 0), 3.0);
        grid.set(5, 5, None);
        assert_eq!(grid.get(5, 5), None);
        assert_eq!(grid.get(0, 0), Some(3.0));
    }
}
