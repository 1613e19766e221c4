//! GlobalLatestCells: per-cell cache of the most recent value per attribute.
//!
//! Each cached value keeps the metadata of the pass that supplied it, so a
//! reader can check machine and pass-type predicates without touching the
//! pass stack. A value "came from the last pass" when its source pass is the
//! newest pass of the cell.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::address::CELLS_PER_SUB_GRID;
use crate::bitmask::SubGridBitmask;
use crate::cell_pass::{CellPass, GpsMode, MachineIndex, PassType};

/// Attributes tracked by the latest-value cache and the attribute existence
/// masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassAttribute {
    /// Height (every pass carries one).
    Height,
    /// Compaction meter value.
    Ccv,
    /// Machine drive power.
    Mdp,
    /// Compaction count accumulation.
    Cca,
    /// Material temperature.
    Temperature,
    /// Vibration frequency.
    Frequency,
    /// Vibration amplitude.
    Amplitude,
    /// Machine speed.
    MachineSpeed,
    /// GPS mode.
    GpsMode,
}

impl PassAttribute {
    /// True if `pass` carries a value for this attribute.
    #[must_use]
    pub fn present_in(self, pass: &CellPass) -> bool {
        match self {
            Self::Height => true,
            Self::Ccv => pass.ccv.is_some(),
            Self::Mdp => pass.mdp.is_some(),
            Self::Cca => pass.cca.is_some(),
            Self::Temperature => pass.material_temperature.is_some(),
            Self::Frequency => pass.frequency.is_some(),
            Self::Amplitude => pass.amplitude.is_some(),
            Self::MachineSpeed => pass.machine_speed.is_some(),
            Self::GpsMode => pass.gps_mode.is_some(),
        }
    }
}

/// A cached attribute value with the identity of its source pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatestValue<T> {
    /// The value.
    pub value: T,
    /// Time of the source pass.
    pub time: DateTime<Utc>,
    /// Machine of the source pass.
    pub machine_index: MachineIndex,
    /// Pass type of the source pass.
    pub pass_type: PassType,
}

impl<T: Copy> LatestValue<T> {
    fn from_pass(value: T, pass: &CellPass) -> Self {
        Self {
            value,
            time: pass.time,
            machine_index: pass.internal_machine_index,
            pass_type: pass.pass_type,
        }
    }
}

/// Latest values of one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestCell {
    /// The newest pass's height, with its identity.
    pub height: Option<LatestValue<f32>>,
    /// Newest non-null CCV.
    pub ccv: Option<LatestValue<i16>>,
    /// Newest non-null MDP.
    pub mdp: Option<LatestValue<i16>>,
    /// Newest non-null CCA.
    pub cca: Option<LatestValue<u8>>,
    /// Newest non-null material temperature.
    pub temperature: Option<LatestValue<u16>>,
    /// Newest non-null frequency.
    pub frequency: Option<LatestValue<u16>>,
    /// Newest non-null amplitude.
    pub amplitude: Option<LatestValue<u16>>,
    /// Newest non-null machine speed.
    pub machine_speed: Option<LatestValue<u16>>,
    /// Newest non-null GPS mode.
    pub gps_mode: Option<LatestValue<GpsMode>>,
}

impl LatestCell {
    /// Derives the latest values from a pass stack iterated newest first.
    pub fn from_newest_first<'a>(passes: impl Iterator<Item = &'a CellPass>) -> Self {
        let mut cell = Self::default();
        for pass in passes {
            if cell.height.is_none() {
                cell.height = Some(LatestValue::from_pass(pass.height, pass));
            }
            fill(&mut cell.ccv, pass.ccv, pass);
            fill(&mut cell.mdp, pass.mdp, pass);
            fill(&mut cell.cca, pass.cca, pass);
            fill(&mut cell.temperature, pass.material_temperature, pass);
            fill(&mut cell.frequency, pass.frequency, pass);
            fill(&mut cell.amplitude, pass.amplitude, pass);
            fill(&mut cell.machine_speed, pass.machine_speed, pass);
            fill(&mut cell.gps_mode, pass.gps_mode, pass);
            if cell.is_complete() {
                break;
            }
        }
        cell
    }

    fn is_complete(&self) -> bool {
        self.height.is_some()
            && self.ccv.is_some()
            && self.mdp.is_some()
            && self.cca.is_some()
            && self.temperature.is_some()
            && self.frequency.is_some()
            && self.amplitude.is_some()
            && self.machine_speed.is_some()
            && self.gps_mode.is_some()
    }

    /// True if the cell has at least one pass.
    #[must_use]
    pub fn has_passes(&self) -> bool {
        self.height.is_some()
    }

    /// Time of the cell's newest pass.
    #[must_use]
    pub fn last_pass_time(&self) -> Option<DateTime<Utc>> {
        self.height.map(|h| h.time)
    }

    fn source_time(&self, attribute: PassAttribute) -> Option<DateTime<Utc>> {
        match attribute {
            PassAttribute::Height => self.height.map(|v| v.time),
            PassAttribute::Ccv => self.ccv.map(|v| v.time),
            PassAttribute::Mdp => self.mdp.map(|v| v.time),
            PassAttribute::Cca => self.cca.map(|v| v.time),
            PassAttribute::Temperature => self.temperature.map(|v| v.time),
            PassAttribute::Frequency => self.frequency.map(|v| v.time),
            PassAttribute::Amplitude => self.amplitude.map(|v| v.time),
            PassAttribute::MachineSpeed => self.machine_speed.map(|v| v.time),
            PassAttribute::GpsMode => self.gps_mode.map(|v| v.time),
        }
    }

    /// True if the cached value of `attribute` came from the newest pass.
    #[must_use]
    pub fn came_from_last_pass(&self, attribute: PassAttribute) -> bool {
        match (self.source_time(attribute), self.last_pass_time()) {
            (Some(source), Some(last)) => source == last,
            _ => false,
        }
    }

    /// True if a value of `attribute` is cached.
    #[must_use]
    pub fn has(&self, attribute: PassAttribute) -> bool {
        self.source_time(attribute).is_some()
    }
}

fn fill<T: Copy>(slot: &mut Option<LatestValue<T>>, value: Option<T>, pass: &CellPass) {
    if slot.is_none() {
        if let Some(v) = value {
            *slot = Some(LatestValue::from_pass(v, pass));
        }
    }
}

/// Latest values of every cell of one leaf tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LatestCells {
    cells: Vec<LatestCell>,
}

impl Default for LatestCells {
    fn default() -> Self {
        Self {
            cells: vec![LatestCell::default(); CELLS_PER_SUB_GRID],
        }
    }
}

impl LatestCells {
    /// Returns the cache entry of cell `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> &LatestCell {
        &self.cells[index]
    }

    /// Replaces the cache entry of cell `index`.
    pub fn set(&mut self, index: usize, cell: LatestCell) {
        self.cells[index] = cell;
    }

    /// Mask of cells holding a value of `attribute`.
    #[must_use]
    pub fn attribute_existence(&self, attribute: PassAttribute) -> SubGridBitmask {
        let mut mask = SubGridBitmask::empty();
        for (index, cell) in self.cells.iter().enumerate() {
            if cell.has(attribute) {
                mask.set_index(index);
            }
        }
        mask
    }

    /// Iterates non-empty cells with their index.
    pub fn iter_populated(&self) -> impl Iterator<Item = (usize, &LatestCell)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, cell)| cell.has_passes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_newest_non_null_wins() {
        let stack = [
            CellPass::new(at(1), 1.0, 0).with_ccv(300),
            CellPass::new(at(2), 2.0, 1).with_ccv(400),
            CellPass::new(at(3), 3.0, 2),
        ];
        let cell = LatestCell::from_newest_first(stack.iter().rev());

        assert_eq!(cell.height.unwrap().value, 3.0);
        assert_eq!(cell.ccv.unwrap().value, 400);
        assert_eq!(cell.ccv.unwrap().machine_index, 1);
        assert!(cell.came_from_last_pass(PassAttribute::Height));
        assert!(!cell.came_from_last_pass(PassAttribute::Ccv));
        assert!(!cell.has(PassAttribute::Mdp));
    }

    #[test]
    fn test_attribute_existence_mask() {
        let mut cells = LatestCells::default();
        let stack = [CellPass::new(at(1), 1.0, 0).with_temperature(1200)];
        cells.set(5, LatestCell::from_newest_first(stack.iter()));

        assert_eq!(cells.attribute_existence(PassAttribute::Temperature).count(), 1);
        assert!(cells.attribute_existence(PassAttribute::Ccv).is_empty());
        assert_eq!(cells.iter_populated().count(), 1);
    }
}
