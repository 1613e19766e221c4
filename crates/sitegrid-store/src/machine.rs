//! Machines and the per-site-model roster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegrid_core::MachineUid;

use crate::cell_pass::MachineIndex;
use crate::error::{Result, StoreError};

/// Kind of machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MachineType {
    /// Not reported.
    #[default]
    Unknown,
    /// Dozer.
    Dozer,
    /// Grader.
    Grader,
    /// Excavator.
    Excavator,
    /// Wheel loader.
    WheelLoader,
    /// Soil compactor (roller).
    SoilCompactor,
    /// Asphalt compactor (roller).
    AsphaltCompactor,
    /// Asphalt paver.
    AsphaltPaver,
}

impl MachineType {
    /// True for rollers.
    #[must_use]
    pub const fn is_compaction(self) -> bool {
        matches!(self, Self::SoilCompactor | Self::AsphaltCompactor)
    }
}

/// One machine known to a site model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    /// External identity.
    pub uid: MachineUid,
    /// Dense index within the owning site model.
    pub internal_index: MachineIndex,
    /// Display name; identifies unidentified machines.
    pub name: String,
    /// Machine kind.
    pub machine_type: MachineType,
    /// True for machines reported without a serial ("John Doe").
    pub is_unidentified: bool,
    /// Last known easting.
    pub last_known_x: Option<f64>,
    /// Last known northing.
    pub last_known_y: Option<f64>,
    /// Time of the last known position.
    pub last_known_position_time: Option<DateTime<Utc>>,
    /// Last design name loaded.
    pub last_known_design_name: Option<String>,
    /// Last layer id entered.
    pub last_known_layer_id: Option<u16>,
}

impl Machine {
    /// Creates a machine with no known position.
    #[must_use]
    pub fn new(
        uid: MachineUid,
        name: impl Into<String>,
        machine_type: MachineType,
        is_unidentified: bool,
    ) -> Self {
        Self {
            uid,
            internal_index: 0,
            name: name.into(),
            machine_type,
            is_unidentified,
            last_known_x: None,
            last_known_y: None,
            last_known_position_time: None,
            last_known_design_name: None,
            last_known_layer_id: None,
        }
    }

    /// True if `other` denotes the same physical machine.
    ///
    /// Identified machines match by GUID; unidentified machines by name.
    #[must_use]
    pub fn same_identity(&self, other: &Self) -> bool {
        if self.is_unidentified || other.is_unidentified {
            self.is_unidentified == other.is_unidentified && self.name == other.name
        } else {
            self.uid == other.uid
        }
    }

    /// Folds denormalized fields from `incoming` into this machine.
    ///
    /// Empty incoming fields never overwrite known values, and a position
    /// older than the known one is ignored. Returns true if anything changed.
    pub fn update_from(&mut self, incoming: &Self) -> bool {
        let before = self.clone();
        if !incoming.name.is_empty() {
            self.name.clone_from(&incoming.name);
        }
        if incoming.machine_type != MachineType::Unknown {
            self.machine_type = incoming.machine_type;
        }
        let newer_position = match (
            incoming.last_known_position_time,
            self.last_known_position_time,
        ) {
            (Some(new), Some(old)) => new >= old,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if newer_position {
            self.last_known_x = incoming.last_known_x.or(self.last_known_x);
            self.last_known_y = incoming.last_known_y.or(self.last_known_y);
            self.last_known_position_time = incoming.last_known_position_time;
            if incoming.last_known_design_name.is_some() {
                self.last_known_design_name
                    .clone_from(&incoming.last_known_design_name);
            }
            if incoming.last_known_layer_id.is_some() {
                self.last_known_layer_id = incoming.last_known_layer_id;
            }
        }
        *self != before
    }
}

/// The machines of one site model, indexed by internal index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineRoster {
    machines: Vec<Machine>,
}

impl MachineRoster {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of machines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// True if the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Machine with internal index `index`.
    #[must_use]
    pub fn get(&self, index: MachineIndex) -> Option<&Machine> {
        self.machines.get(usize::from(index))
    }

    /// Machine with internal index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownMachine`] if the index is not assigned.
    pub fn require(&self, index: MachineIndex) -> Result<&Machine> {
        self.get(index).ok_or(StoreError::UnknownMachine { index })
    }

    /// Finds the roster entry with the same identity as `machine`.
    #[must_use]
    pub fn locate(&self, machine: &Machine) -> Option<&Machine> {
        self.machines.iter().find(|m| m.same_identity(machine))
    }

    /// Finds an identified machine by GUID.
    #[must_use]
    pub fn locate_by_uid(&self, uid: MachineUid) -> Option<&Machine> {
        self.machines
            .iter()
            .find(|m| !m.is_unidentified && m.uid == uid)
    }

    /// Adds `machine`, assigning the next internal index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inconsistent`] if the index space is exhausted.
    pub fn create(&mut self, mut machine: Machine) -> Result<&Machine> {
        let index = MachineIndex::try_from(self.machines.len())
            .map_err(|_| StoreError::inconsistent("machine index space exhausted"))?;
        machine.internal_index = index;
        self.machines.push(machine);
        Ok(&self.machines[usize::from(index)])
    }

    /// Mutable access to the machine at `index`.
    pub fn get_mut(&mut self, index: MachineIndex) -> Option<&mut Machine> {
        self.machines.get_mut(usize::from(index))
    }

    /// Iterates machines in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Machine> {
        self.machines.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_create_assigns_dense_indices() {
        let mut roster = MachineRoster::new();
        let a = roster
            .create(Machine::new(
                MachineUid::generate(),
                "roller",
                MachineType::SoilCompactor,
                false,
            ))
            .unwrap()
            .internal_index;
        let b = roster
            .create(Machine::new(MachineUid::generate(), "dozer", MachineType::Dozer, false))
            .unwrap()
            .internal_index;
        assert_eq!((a, b), (0, 1));
        assert!(roster.get(0).unwrap().machine_type.is_compaction());
        assert!(roster.require(2).is_err());
    }

    #[test]
    fn test_unidentified_machines_match_by_name() {
        let mut roster = MachineRoster::new();
        roster
            .create(Machine::new(MachineUid::generate(), "john doe 1", MachineType::Unknown, true))
            .unwrap();

        let lookalike =
            Machine::new(MachineUid::generate(), "john doe 1", MachineType::Unknown, true);
        assert!(roster.locate(&lookalike).is_some());
        let other = Machine::new(MachineUid::generate(), "john doe 2", MachineType::Unknown, true);
        assert!(roster.locate(&other).is_none());
    }

    #[test]
    fn test_update_ignores_older_position_and_empty_fields() {
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let uid = MachineUid::generate();
        let mut known = Machine::new(uid, "excavator", MachineType::Excavator, false);
        known.last_known_x = Some(10.0);
        known.last_known_position_time = Some(t0);

        let mut stale = Machine::new(uid, "", MachineType::Unknown, false);
        stale.last_known_x = Some(99.0);
        stale.last_known_position_time = Some(t0 - chrono::Duration::seconds(60));
        assert!(!known.update_from(&stale));
        assert_eq!(known.name, "excavator");

        let mut fresh = stale.clone();
        fresh.last_known_position_time = Some(t0 + chrono::Duration::seconds(60));
        fresh.last_known_layer_id = Some(2);
        assert!(known.update_from(&fresh));
        assert_eq!(known.last_known_x, Some(99.0));
        assert_eq!(known.last_known_layer_id, Some(2));
    }
}
