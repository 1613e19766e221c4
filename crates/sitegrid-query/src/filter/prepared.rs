//! Filters resolved against one site model, ready to evaluate passes.

use sitegrid_store::address::{CELLS_PER_SUB_GRID, cell_index};
use sitegrid_store::design::{DesignRef, HeightGrid};
use sitegrid_store::event_snapshot::{EventPopulationControl, EventSnapshot};
use sitegrid_store::events::{
    AutomaticsMode, ElevationMappingMode, MachineGear, PositioningTech,
};
use sitegrid_store::machine::MachineRoster;
use sitegrid_store::{CellPass, MachineIndex, PassType};

use super::{CellPassAttributeFilter, ElevationRange, MachineDirection};

/// A candidate pass with the machine event state in force at its time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredPassData {
    /// The pass.
    pub pass: CellPass,
    /// Event state at `pass.time`, populated per the filter's needs.
    pub events: EventSnapshot,
}

impl FilteredPassData {
    /// Wraps a pass with an empty snapshot.
    #[must_use]
    pub fn without_events(pass: CellPass) -> Self {
        Self {
            pass,
            events: EventSnapshot::default(),
        }
    }

    /// True if the recording machine mapped minimum elevations at this pass.
    #[must_use]
    pub fn is_min_elevation_mapping(&self) -> bool {
        self.events.elevation_mapping == Some(ElevationMappingMode::MinimumElevation)
    }
}

/// Dense bitset over internal machine indices.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MachineBitSet {
    words: Vec<u64>,
}

impl MachineBitSet {
    fn insert(&mut self, index: MachineIndex) {
        let word = usize::from(index) / 64;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % 64);
    }

    fn contains(&self, index: MachineIndex) -> bool {
        self.words
            .get(usize::from(index) / 64)
            .is_some_and(|w| w & (1 << (index % 64)) != 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ElevationBounds {
    Uninitialized,
    NotRequired,
    Constant { top: f64, bottom: f64 },
    PerCell(Vec<Option<(f64, f64)>>),
}

/// A filter bound to a machine roster.
#[derive(Debug, Clone)]
pub struct PreparedFilter {
    filter: CellPassAttributeFilter,
    machines: Option<MachineBitSet>,
    compaction: MachineBitSet,
    elevation: ElevationBounds,
    temperature_by_last_pass: bool,
}

impl CellPassAttributeFilter {
    /// Resolves machine selections against `roster`.
    ///
    /// Must be called again whenever the machine selection changes. Machine
    /// GUIDs absent from the roster select nothing.
    #[must_use]
    pub fn prepare(&self, roster: &MachineRoster) -> PreparedFilter {
        let machines = self.machines().map(|uids| {
            let mut set = MachineBitSet::default();
            for uid in uids {
                if let Some(machine) = roster.locate_by_uid(*uid) {
                    set.insert(machine.internal_index);
                }
            }
            set
        });
        let mut compaction = MachineBitSet::default();
        for machine in roster.iter() {
            if machine.machine_type.is_compaction() {
                compaction.insert(machine.internal_index);
            }
        }
        let elevation = if self.has_elevation_range() {
            ElevationBounds::Uninitialized
        } else {
            ElevationBounds::NotRequired
        };

        PreparedFilter {
            filter: self.clone(),
            machines,
            compaction,
            elevation,
            temperature_by_last_pass: false,
        }
    }
}

impl PreparedFilter {
    /// The underlying filter.
    #[must_use]
    pub const fn filter(&self) -> &CellPassAttributeFilter {
        &self.filter
    }

    /// Applies the temperature range to the selected pass only, instead of
    /// to every candidate.
    #[must_use]
    pub const fn with_temperature_by_last_pass(mut self, enabled: bool) -> Self {
        self.temperature_by_last_pass = enabled;
        self
    }

    /// True if the temperature range is applied to the selected pass only.
    #[must_use]
    pub const fn temperature_by_last_pass(&self) -> bool {
        self.temperature_by_last_pass
    }

    /// Event kinds a scan must populate.
    #[must_use]
    pub const fn event_population(&self) -> EventPopulationControl {
        self.filter.event_population()
    }

    /// The design the elevation range hangs from, if any.
    #[must_use]
    pub fn elevation_range_design(&self) -> Option<&DesignRef> {
        match self.filter.elevation_range() {
            Some(ElevationRange::Design { design, .. }) => Some(design),
            _ => None,
        }
    }

    /// Derives per-cell elevation bounds for one tile.
    ///
    /// For a level-based range `design` is ignored. For a design-based range
    /// a missing grid, or a missing sample, makes the affected cells match
    /// nothing.
    pub fn init_elevation_range(&mut self, design: Option<&HeightGrid>) {
        self.elevation = match self.filter.elevation_range() {
            None => ElevationBounds::NotRequired,
            Some(ElevationRange::Level {
                level,
                offset,
                thickness,
            }) => {
                let top = level + offset;
                ElevationBounds::Constant {
                    top,
                    bottom: top - thickness,
                }
            }
            Some(ElevationRange::Design {
                offset, thickness, ..
            }) => {
                let mut cells = vec![None; CELLS_PER_SUB_GRID];
                if let Some(grid) = design {
                    for x in 0..32 {
                        for y in 0..32 {
                            cells[cell_index(x, y)] = grid.get(x, y).map(|h| {
                                let top = f64::from(h) + offset;
                                (top, top - thickness)
                            });
                        }
                    }
                }
                ElevationBounds::PerCell(cells)
            }
        };
    }

    fn elevation_accepts(&self, height: f32, x: u32, y: u32) -> bool {
        let height = f64::from(height);
        match &self.elevation {
            ElevationBounds::NotRequired => true,
            ElevationBounds::Uninitialized => {
                panic!("elevation range predicate evaluated before init_elevation_range")
            }
            ElevationBounds::Constant { top, bottom } => height >= *bottom && height <= *top,
            ElevationBounds::PerCell(cells) => cells[cell_index(x, y)]
                .is_some_and(|(top, bottom)| height >= bottom && height <= top),
        }
    }

    /// True if `index` is in the machine selection (or no selection is set).
    #[must_use]
    pub fn machine_selected(&self, index: MachineIndex) -> bool {
        self.machines.as_ref().is_none_or(|set| set.contains(index))
    }

    /// True if `index` is a compaction machine.
    #[must_use]
    pub fn is_compaction_machine(&self, index: MachineIndex) -> bool {
        self.compaction.contains(index)
    }

    /// Evaluates every active predicate against a candidate pass at local
    /// cell `(x, y)`, stopping at the first rejection.
    ///
    /// # Panics
    ///
    /// Panics if an elevation range is enabled and
    /// [`PreparedFilter::init_elevation_range`] has not been called.
    #[must_use]
    pub fn filter_pass(&self, data: &FilteredPassData, x: u32, y: u32) -> bool {
        let f = &self.filter;
        let pass = &data.pass;
        let events = &data.events;

        if let Some(range) = f.time_range() {
            if pass.time < range.start || pass.time > range.end {
                return false;
            }
        }
        if let Some(design) = f.design_name() {
            if events.design_name != Some(design) {
                return false;
            }
        }
        if !self.machine_selected(pass.internal_machine_index) {
            return false;
        }
        if let Some(direction) = f.direction() {
            let moving = match events.machine_gear {
                Some(MachineGear::Forward) => Some(MachineDirection::Forward),
                Some(MachineGear::Reverse) => Some(MachineDirection::Reverse),
                _ => None,
            };
            if moving != Some(direction) {
                return false;
            }
        }
        if let Some(types) = f.pass_types() {
            if !types.contains(pass.pass_type.as_set()) {
                return false;
            }
        }
        if let Some(state) = f.vibration_state() {
            if events.vibration_state != Some(state) {
                return false;
            }
        }
        if let Some(mode) = f.min_elevation_mapping() {
            let actual = events
                .elevation_mapping
                .unwrap_or(ElevationMappingMode::LatestElevation);
            if actual != mode {
                return false;
            }
        }
        if let Some(mode) = f.guidance_mode() {
            if events.automatics.unwrap_or(AutomaticsMode::Unknown) != mode {
                return false;
            }
        }
        if let Some(wanted) = f.gps_accuracy() {
            let Some(actual) = events.gps_accuracy else {
                return false;
            };
            let ok = if wanted.inclusive {
                actual.accuracy <= wanted.accuracy
            } else {
                actual.accuracy == wanted.accuracy
            };
            if !ok {
                return false;
            }
        }
        if let Some(wanted) = f.gps_tolerance() {
            let Some(actual) = events.gps_accuracy else {
                return false;
            };
            let ok = if wanted.greater_than {
                actual.tolerance_mm > wanted.tolerance_mm
            } else {
                actual.tolerance_mm <= wanted.tolerance_mm
            };
            if !ok {
                return false;
            }
        }
        if let Some(tech) = f.positioning_tech() {
            if events.positioning_tech.unwrap_or(PositioningTech::Unknown) != tech {
                return false;
            }
        }
        if !self.elevation_accepts(pass.height, x, y) {
            return false;
        }
        if f.has_compaction_machines_only()
            && !self.is_compaction_machine(pass.internal_machine_index)
        {
            return false;
        }
        if let Some(layer) = f.layer_id() {
            if events.layer_id != Some(layer) {
                return false;
            }
        }
        if !self.temperature_by_last_pass && !self.filter_pass_using_temperature_range(pass) {
            return false;
        }
        true
    }

    /// Applies only the temperature range predicate.
    #[must_use]
    pub fn filter_pass_using_temperature_range(&self, pass: &CellPass) -> bool {
        match self.filter.temperature_range() {
            None => true,
            Some(range) => pass
                .material_temperature
                .is_some_and(|t| t >= range.min && t <= range.max),
        }
    }

    /// Checks a cached latest value's source pass against the predicates the
    /// cache can answer (machine set, pass type, compaction only).
    #[must_use]
    pub fn filter_last_value(&self, machine_index: MachineIndex, pass_type: PassType) -> bool {
        if !self.machine_selected(machine_index) {
            return false;
        }
        if let Some(types) = self.filter.pass_types() {
            if !types.contains(pass_type.as_set()) {
                return false;
            }
        }
        !(self.filter.has_compaction_machines_only() && !self.is_compaction_machine(machine_index))
    }
}
