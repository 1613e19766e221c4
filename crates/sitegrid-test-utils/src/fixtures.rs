//! Factories for passes, site models and design surfaces.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use sitegrid_core::{MachineUid, SiteModelId};
use sitegrid_store::design::{DesignElevationLookup, DesignLookupError, DesignRef, HeightGrid};
use sitegrid_store::machine::{Machine, MachineType};
use sitegrid_store::{
    CellAddress, CellPass, LeafSubGrid, MachineIndex, PassTree, SiteModel, SubGridKey,
};

/// Base instant of every fixture timeline.
pub const EPOCH_SECS: i64 = 1_700_000_000;

/// The instant `secs` seconds after the fixture epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH_SECS + secs, 0).unwrap()
}

/// A full front pass at `ts(secs)`.
pub fn pass(secs: i64, height: f32, machine: MachineIndex) -> CellPass {
    CellPass::new(ts(secs), height, machine)
}

/// Adds a machine to `model`'s roster and returns its internal index.
pub fn add_machine(model: &SiteModel, name: &str, machine_type: MachineType) -> MachineIndex {
    add_machine_with_uid(model, MachineUid::generate(), name, machine_type)
}

/// Adds a machine with a known GUID and returns its internal index.
pub fn add_machine_with_uid(
    model: &SiteModel,
    uid: MachineUid,
    name: &str,
    machine_type: MachineType,
) -> MachineIndex {
    model.update_state(|state| {
        state
            .roster
            .create(Machine::new(uid, name, machine_type, false))
            .map(|m| m.internal_index)
            .expect("roster accepts machine")
    })
}

/// Merges `passes` into the live leaves of `model` and marks their leaves
/// as existing, bypassing durable storage.
pub fn seed_passes(model: &SiteModel, passes: impl IntoIterator<Item = (CellAddress, CellPass)>) {
    let mut tree = PassTree::new();
    for (cell, pass) in passes {
        tree.add_pass(cell, pass);
    }
    for (key, incoming) in tree.leaves() {
        let mut leaf = model
            .leaf(key)
            .map_or_else(|| LeafSubGrid::new(key), |live| (*live).clone());
        leaf.merge_stacks(incoming.stacks());
        model.spatial().publish(Arc::new(leaf));
    }
    let existence = tree.existence();
    model.update_state(|state| state.existence.union_with(&existence));
}

/// A site model with no data.
pub fn empty_site_model() -> SiteModel {
    SiteModel::new(SiteModelId::generate())
}

/// Design surface at a constant elevation, with optional holes.
#[derive(Debug, Clone, Default)]
pub struct ConstantDesign {
    /// Elevation of every sampled cell.
    pub height: f32,
    /// Local cells with no sample.
    pub holes: HashSet<(u32, u32)>,
}

impl ConstantDesign {
    /// A surface at `height` everywhere.
    pub fn new(height: f32) -> Self {
        Self {
            height,
            holes: HashSet::new(),
        }
    }

    /// Removes the sample at local `(x, y)` of every tile.
    #[must_use]
    pub fn with_hole(mut self, x: u32, y: u32) -> Self {
        self.holes.insert((x, y));
        self
    }
}

impl DesignElevationLookup for ConstantDesign {
    fn design_heights(
        &self,
        _site_model: SiteModelId,
        _design: &DesignRef,
        offset: f64,
        origin: SubGridKey,
        _cell_size: f64,
    ) -> Result<HeightGrid, DesignLookupError> {
        #[allow(clippy::cast_possible_truncation)]
        let mut grid = HeightGrid::filled(origin, self.height + offset as f32);
        for (x, y) in &self.holes {
            grid.set(*x, *y, None);
        }
        Ok(grid)
    }
}

/// Design lookup that always fails with the given status.
#[derive(Debug, Clone)]
pub struct FailingDesign(pub DesignLookupError);

impl DesignElevationLookup for FailingDesign {
    fn design_heights(
        &self,
        _site_model: SiteModelId,
        _design: &DesignRef,
        _offset: f64,
        _origin: SubGridKey,
        _cell_size: f64,
    ) -> Result<HeightGrid, DesignLookupError> {
        Err(self.0.clone())
    }
}
