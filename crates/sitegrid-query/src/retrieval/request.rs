//! Per-request retrieval configuration.

use sitegrid_store::design::DesignRef;
use sitegrid_store::{SUB_GRID_TREE_DIMENSION, SubGridBitmask, SubGridKey};

use super::lift::LiftParams;
use crate::data_type::GridDataType;
use crate::filter::CellPassAttributeFilter;

/// Default cap on passes examined per cell.
pub const DEFAULT_MAX_PASSES_TO_EXAMINE: usize = 1000;

/// Regular sub-sampling of a tile for coarse rendering.
///
/// A cell is kept when its absolute coordinates are multiples of the step
/// sizes. Steps of one keep every cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SieveParams {
    /// Column step.
    pub step_x: u32,
    /// Row step.
    pub step_y: u32,
}

impl Default for SieveParams {
    fn default() -> Self {
        Self {
            step_x: 1,
            step_y: 1,
        }
    }
}

impl SieveParams {
    /// The sieve mask for the tile at `origin`.
    #[must_use]
    pub fn mask(self, origin: SubGridKey) -> SubGridBitmask {
        if self.step_x <= 1 && self.step_y <= 1 {
            return SubGridBitmask::full();
        }
        let step_x = self.step_x.max(1);
        let step_y = self.step_y.max(1);
        let mut mask = SubGridBitmask::empty();
        for x in 0..SUB_GRID_TREE_DIMENSION {
            if (origin.origin_x + x) % step_x != 0 {
                continue;
            }
            for y in 0..SUB_GRID_TREE_DIMENSION {
                if (origin.origin_y + y) % step_y == 0 {
                    mask.set(x, y);
                }
            }
        }
        mask
    }
}

/// Everything a retriever needs besides the site model.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Attribute the retriever is configured for.
    pub data_type: GridDataType,
    /// Pass filter.
    pub filter: CellPassAttributeFilter,
    /// Cells selected by the query geometry; `None` selects every cell.
    pub spatial_restriction: Option<SubGridBitmask>,
    /// Sub-sampling pattern.
    pub sieve: SieveParams,
    /// Caller-supplied production data mask.
    pub production_mask: Option<SubGridBitmask>,
    /// Passes examined per cell before giving up.
    pub max_passes_to_examine: usize,
    /// Lift analysis configuration.
    pub lift: Option<LiftParams>,
    /// Apply the temperature range to the selected pass only.
    pub temperature_by_last_pass: bool,
    /// Design surface for cut/fill tiles.
    pub cut_fill_design: Option<DesignRef>,
}

impl RetrievalRequest {
    /// A request for `data_type` with default settings.
    #[must_use]
    pub fn new(data_type: GridDataType, filter: CellPassAttributeFilter) -> Self {
        Self {
            data_type,
            filter,
            spatial_restriction: None,
            sieve: SieveParams::default(),
            production_mask: None,
            max_passes_to_examine: DEFAULT_MAX_PASSES_TO_EXAMINE,
            lift: None,
            temperature_by_last_pass: false,
            cut_fill_design: None,
        }
    }

    /// Sets the lift analysis configuration.
    #[must_use]
    pub fn with_lift(mut self, lift: LiftParams) -> Self {
        self.lift = Some(lift);
        self
    }

    /// Sets the cut/fill design.
    #[must_use]
    pub fn with_cut_fill_design(mut self, design: DesignRef) -> Self {
        self.cut_fill_design = Some(design);
        self
    }

    /// Applies the temperature range to the selected pass only.
    #[must_use]
    pub fn with_temperature_by_last_pass(mut self) -> Self {
        self.temperature_by_last_pass = true;
        self
    }
}
