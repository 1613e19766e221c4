//! Dense output tiles filled by the retriever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegrid_store::address::{CELLS_PER_SUB_GRID, cell_index, cell_position};
use sitegrid_store::{CellPass, GpsMode, MachineIndex, SubGridBitmask, SubGridKey};

use crate::data_type::GridDataType;

/// An elevation with the time of the pass that supplied it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedHeight {
    /// Elevation in metres.
    pub height: f32,
    /// Time of the supplying pass.
    pub time: DateTime<Utc>,
}

/// First, last, lowest and highest accepted elevations of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeHeights {
    /// Oldest accepted pass.
    pub first: TimedHeight,
    /// Newest accepted pass.
    pub last: TimedHeight,
    /// Lowest accepted pass.
    pub lowest: TimedHeight,
    /// Highest accepted pass.
    pub highest: TimedHeight,
}

/// Layer summary of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellProfileValue {
    /// Layers found.
    pub layer_count: u16,
    /// Passes in the top layer.
    pub top_layer_pass_count: u16,
    /// Height of the top layer.
    pub top_layer_height: f32,
    /// Passes accepted across every layer.
    pub total_pass_count: u16,
}

/// The resolved value of one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// Elevation.
    Height(f32),
    /// Elevation and time.
    HeightAndTime(TimedHeight),
    /// Composite elevations.
    CompositeHeights(CompositeHeights),
    /// Production minus design elevation.
    CutFill(f32),
    /// CCV with the machine target in force.
    Ccv {
        /// Measured value.
        value: i16,
        /// Target, if reported.
        target: Option<i16>,
    },
    /// MDP with the machine target in force.
    Mdp {
        /// Measured value.
        value: i16,
        /// Target, if reported.
        target: Option<i16>,
    },
    /// CCA with the machine target in force.
    Cca {
        /// Measured value.
        value: u8,
        /// Target, if reported.
        target: Option<u8>,
    },
    /// Accepted pass count.
    PassCount {
        /// Full passes counted.
        count: u16,
        /// Target pass count, if reported.
        target: Option<u16>,
        /// Half passes in the top layer.
        top_layer_half_passes: u16,
    },
    /// Material temperature.
    Temperature(u16),
    /// Machine speed.
    MachineSpeed(u16),
    /// Vibration frequency.
    Frequency(u16),
    /// Vibration amplitude.
    Amplitude(u16),
    /// GPS mode.
    GpsMode(GpsMode),
    /// Layer summary.
    CellProfile(CellProfileValue),
    /// Every accepted pass, oldest first.
    CellPasses(Vec<CellPass>),
}

impl CellValue {
    /// The elevation carried by height-like values.
    #[must_use]
    pub fn height(&self) -> Option<f32> {
        match self {
            Self::Height(h) | Self::CutFill(h) => Some(*h),
            Self::HeightAndTime(t) => Some(t.height),
            Self::CompositeHeights(c) => Some(c.last.height),
            _ => None,
        }
    }
}

/// Identity of the pass that supplied a cell value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassSource {
    /// Pass time.
    pub time: DateTime<Utc>,
    /// Internal machine index of the recording machine.
    pub machine_index: MachineIndex,
}

/// One output tile.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientLeafSubGrid {
    data_type: GridDataType,
    origin: SubGridKey,
    cells: Vec<Option<CellValue>>,
    sources: Vec<Option<PassSource>>,
    from_last_pass: SubGridBitmask,
}

impl ClientLeafSubGrid {
    /// An empty tile of `data_type` at `origin`.
    #[must_use]
    pub fn new(data_type: GridDataType, origin: SubGridKey) -> Self {
        Self {
            data_type,
            origin,
            cells: vec![None; CELLS_PER_SUB_GRID],
            sources: vec![None; CELLS_PER_SUB_GRID],
            from_last_pass: SubGridBitmask::empty(),
        }
    }

    /// Declared attribute type.
    #[must_use]
    pub const fn data_type(&self) -> GridDataType {
        self.data_type
    }

    /// Tile origin.
    #[must_use]
    pub const fn origin(&self) -> SubGridKey {
        self.origin
    }

    /// Value at local `(x, y)`.
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Option<&CellValue> {
        self.cells[cell_index(x, y)].as_ref()
    }

    /// Supplying pass at local `(x, y)`.
    #[must_use]
    pub fn source(&self, x: u32, y: u32) -> Option<PassSource> {
        self.sources[cell_index(x, y)]
    }

    /// Assigns a value.
    pub fn set(
        &mut self,
        x: u32,
        y: u32,
        value: CellValue,
        source: PassSource,
        from_last_pass: bool,
    ) {
        let index = cell_index(x, y);
        self.cells[index] = Some(value);
        self.sources[index] = Some(source);
        self.from_last_pass.set_value(x, y, from_last_pass);
    }

    /// Replaces the value at `(x, y)`, keeping its source. A `None` value
    /// clears the cell entirely.
    pub fn replace(&mut self, x: u32, y: u32, value: Option<CellValue>) {
        let index = cell_index(x, y);
        if value.is_none() {
            self.sources[index] = None;
            self.from_last_pass.clear(x, y);
        }
        self.cells[index] = value;
    }

    /// Resets every cell to null.
    pub fn clear(&mut self) {
        self.cells.fill(None);
        self.sources.fill(None);
        self.from_last_pass = SubGridBitmask::empty();
    }

    /// Cells whose value came from the cell's newest pass.
    #[must_use]
    pub const fn from_last_pass(&self) -> &SubGridBitmask {
        &self.from_last_pass
    }

    /// Cells holding a value.
    #[must_use]
    pub fn populated(&self) -> SubGridBitmask {
        let mut mask = SubGridBitmask::empty();
        for (i, cell) in self.cells.iter().enumerate() {
            if cell.is_some() {
                mask.set_index(i);
            }
        }
        mask
    }

    /// Populated cells with their local coordinates.
    pub fn iter(&self) -> impl Iterator<Item = ((u32, u32), &CellValue)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, c)| c.as_ref().map(|v| (cell_position(i), v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_set_and_replace() {
        let mut tile = ClientLeafSubGrid::new(GridDataType::Height, SubGridKey::containing(0, 0));
        let source = PassSource {
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            machine_index: 2,
        };
        tile.set(3, 4, CellValue::Height(1.5), source, true);
        assert_eq!(tile.get(3, 4), Some(&CellValue::Height(1.5)));
        assert!(tile.from_last_pass().get(3, 4));
        assert_eq!(tile.populated().count(), 1);

        tile.replace(3, 4, None);
        assert_eq!(tile.get(3, 4), None);
        assert_eq!(tile.source(3, 4), None);
        assert!(!tile.from_last_pass().get(3, 4));
    }
}
