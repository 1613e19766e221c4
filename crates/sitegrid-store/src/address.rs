//! Cell and leaf tile addressing.
//!
//! Cell coordinates are unsigned grid indices. A leaf tile covers a 32x32
//! block whose origin is the cell coordinate with its low five bits cleared.

use serde::{Deserialize, Serialize};

/// Cells along one side of a leaf tile.
pub const SUB_GRID_TREE_DIMENSION: u32 = 32;

/// Shift converting a cell coordinate to a leaf coordinate.
pub const SUB_GRID_TREE_DIMENSION_SHIFT: u32 = 5;

/// Cells in one leaf tile.
pub const CELLS_PER_SUB_GRID: usize = 1024;

const LOCAL_MASK: u32 = SUB_GRID_TREE_DIMENSION - 1;

/// Absolute address of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    /// Cell column.
    pub x: u32,
    /// Cell row.
    pub y: u32,
}

impl CellAddress {
    /// Creates a cell address.
    #[must_use]
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Returns the key of the leaf tile containing this cell.
    #[must_use]
    pub const fn leaf(self) -> SubGridKey {
        SubGridKey::containing(self.x, self.y)
    }

    /// Returns the cell's position within its leaf tile.
    #[must_use]
    pub const fn local(self) -> (u32, u32) {
        (self.x & LOCAL_MASK, self.y & LOCAL_MASK)
    }
}

/// Origin of one leaf tile, aligned to the tile dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubGridKey {
    /// Cell column of the tile origin.
    pub origin_x: u32,
    /// Cell row of the tile origin.
    pub origin_y: u32,
}

impl SubGridKey {
    /// Returns the key of the leaf tile containing cell `(x, y)`.
    #[must_use]
    pub const fn containing(x: u32, y: u32) -> Self {
        Self {
            origin_x: x & !LOCAL_MASK,
            origin_y: y & !LOCAL_MASK,
        }
    }

    /// Returns the leaf's coordinates in leaf units.
    #[must_use]
    pub const fn leaf_coords(self) -> (u32, u32) {
        (
            self.origin_x >> SUB_GRID_TREE_DIMENSION_SHIFT,
            self.origin_y >> SUB_GRID_TREE_DIMENSION_SHIFT,
        )
    }

    /// Builds a key from leaf-unit coordinates.
    #[must_use]
    pub const fn from_leaf_coords(leaf_x: u32, leaf_y: u32) -> Self {
        Self {
            origin_x: leaf_x << SUB_GRID_TREE_DIMENSION_SHIFT,
            origin_y: leaf_y << SUB_GRID_TREE_DIMENSION_SHIFT,
        }
    }

    /// Returns the absolute address of local cell `(x, y)`.
    #[must_use]
    pub const fn cell(self, x: u32, y: u32) -> CellAddress {
        CellAddress {
            x: self.origin_x + x,
            y: self.origin_y + y,
        }
    }
}

/// Flattens a local cell position into a stack index.
#[must_use]
pub const fn cell_index(x: u32, y: u32) -> usize {
    ((x & LOCAL_MASK) * SUB_GRID_TREE_DIMENSION + (y & LOCAL_MASK)) as usize
}

/// Inverse of [`cell_index`].
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub const fn cell_position(index: usize) -> (u32, u32) {
    let i = index as u32;
    (i / SUB_GRID_TREE_DIMENSION, i % SUB_GRID_TREE_DIMENSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_origin_clears_low_bits() {
        let key = CellAddress::new(70, 33).leaf();
        assert_eq!(key, SubGridKey { origin_x: 64, origin_y: 32 });
        assert_eq!(CellAddress::new(70, 33).local(), (6, 1));
        assert_eq!(key.leaf_coords(), (2, 1));
        assert_eq!(SubGridKey::from_leaf_coords(2, 1), key);
    }

    #[test]
    fn test_cell_index_inverts() {
        for (x, y) in [(0, 0), (2, 2), (31, 0), (0, 31), (31, 31)] {
            assert_eq!(cell_position(cell_index(x, y)), (x, y));
        }
        assert_eq!(cell_index(31, 31), CELLS_PER_SUB_GRID - 1);
    }
}
