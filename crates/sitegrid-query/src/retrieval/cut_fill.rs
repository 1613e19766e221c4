//! Cut/fill: production elevation minus design elevation, cell by cell.

use sitegrid_store::SUB_GRID_TREE_DIMENSION;
use sitegrid_store::design::HeightGrid;

use super::client_tile::{CellValue, ClientLeafSubGrid};

/// Difference of two co-registered samples; null if either side is null.
#[must_use]
pub fn cut_fill(production: Option<f32>, design: Option<f32>) -> Option<f32> {
    Some(production? - design?)
}

/// Rewrites a tile of production heights into cut/fill values against
/// `design`. Cells without a design sample become null.
pub fn apply_design(tile: &mut ClientLeafSubGrid, design: &HeightGrid) {
    for x in 0..SUB_GRID_TREE_DIMENSION {
        for y in 0..SUB_GRID_TREE_DIMENSION {
            let production = tile.get(x, y).and_then(CellValue::height);
            let value = cut_fill(production, design.get(x, y)).map(CellValue::CutFill);
            tile.replace(x, y, value);
        }
    }
}
