//! Denormalized site-model metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::{SUB_GRID_TREE_DIMENSION, SubGridKey};
use crate::existence::ExistenceMap;

/// Default cell size in metres.
pub const DEFAULT_CELL_SIZE: f64 = 0.34;

/// Plan extent in grid cell coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellExtent {
    /// Minimum cell column.
    pub min_x: u32,
    /// Minimum cell row.
    pub min_y: u32,
    /// Maximum cell column (inclusive).
    pub max_x: u32,
    /// Maximum cell row (inclusive).
    pub max_y: u32,
}

impl CellExtent {
    /// Extent of one leaf tile.
    #[must_use]
    pub const fn of_leaf(key: SubGridKey) -> Self {
        Self {
            min_x: key.origin_x,
            min_y: key.origin_y,
            max_x: key.origin_x + SUB_GRID_TREE_DIMENSION - 1,
            max_y: key.origin_y + SUB_GRID_TREE_DIMENSION - 1,
        }
    }

    /// Smallest extent containing both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// Extent covering every leaf of `map`.
    #[must_use]
    pub fn of_existence(map: &ExistenceMap) -> Option<Self> {
        map.iter().map(Self::of_leaf).reduce(Self::union)
    }
}

/// Metadata maintained on every ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteModelMetadata {
    /// Cell size in metres.
    pub cell_size: f64,
    /// Extent of all data.
    pub extent: Option<CellExtent>,
    /// Number of machines in the roster.
    pub machine_count: usize,
    /// Time of the last successful ingest.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for SiteModelMetadata {
    fn default() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            extent: None,
            machine_count: 0,
            last_modified: None,
        }
    }
}

impl SiteModelMetadata {
    /// Extends the extent by the leaves of `delta`.
    pub fn include(&mut self, delta: &ExistenceMap) {
        if let Some(added) = CellExtent::of_existence(delta) {
            self.extent = Some(match self.extent {
                Some(current) => current.union(added),
                None => added,
            });
        }
    }
}
