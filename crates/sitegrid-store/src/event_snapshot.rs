//! Machine event state at one pass's time.
//!
//! A full-stack scan looks up, per candidate pass, only the event kinds the
//! active filter predicates consult. [`EventPopulationControl`] names those
//! kinds; [`EventSnapshot::populate`] fills them.

use chrono::{DateTime, Utc};

use crate::design::DesignNameId;
use crate::events::{
    AutomaticsMode, ElevationMappingMode, GpsAccuracyState, MachineGear, PositioningTech,
    ProductionEventLists, VibrationState,
};

/// Which event kinds a scan must populate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct EventPopulationControl {
    /// Design name.
    pub design_name: bool,
    /// Vibration state.
    pub vibration_state: bool,
    /// Machine gear.
    pub machine_gear: bool,
    /// Automatics mode.
    pub automatics: bool,
    /// Elevation mapping mode.
    pub elevation_mapping: bool,
    /// GPS accuracy and tolerance.
    pub gps_accuracy: bool,
    /// Positioning technology.
    pub positioning_tech: bool,
    /// Layer id.
    pub layer_id: bool,
    /// Target values (CCV, MDP, CCA, pass count).
    pub targets: bool,
}

impl EventPopulationControl {
    /// True if any kind is requested.
    #[must_use]
    pub const fn any(&self) -> bool {
        self.design_name
            || self.vibration_state
            || self.machine_gear
            || self.automatics
            || self.elevation_mapping
            || self.gps_accuracy
            || self.positioning_tech
            || self.layer_id
            || self.targets
    }

    /// Union of two controls.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            design_name: self.design_name || other.design_name,
            vibration_state: self.vibration_state || other.vibration_state,
            machine_gear: self.machine_gear || other.machine_gear,
            automatics: self.automatics || other.automatics,
            elevation_mapping: self.elevation_mapping || other.elevation_mapping,
            gps_accuracy: self.gps_accuracy || other.gps_accuracy,
            positioning_tech: self.positioning_tech || other.positioning_tech,
            layer_id: self.layer_id || other.layer_id,
            targets: self.targets || other.targets,
        }
    }
}

/// Event state in force at one instant. Unrequested kinds stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EventSnapshot {
    /// Design name id.
    pub design_name: Option<DesignNameId>,
    /// Vibration state.
    pub vibration_state: Option<VibrationState>,
    /// Machine gear.
    pub machine_gear: Option<MachineGear>,
    /// Automatics mode.
    pub automatics: Option<AutomaticsMode>,
    /// Elevation mapping mode.
    pub elevation_mapping: Option<ElevationMappingMode>,
    /// GPS accuracy and tolerance.
    pub gps_accuracy: Option<GpsAccuracyState>,
    /// Positioning technology.
    pub positioning_tech: Option<PositioningTech>,
    /// Layer id.
    pub layer_id: Option<u16>,
    /// Target CCV.
    pub target_ccv: Option<i16>,
    /// Target MDP.
    pub target_mdp: Option<i16>,
    /// Target CCA.
    pub target_cca: Option<u8>,
    /// Target pass count.
    pub target_pass_count: Option<u16>,
}

impl EventSnapshot {
    /// Looks up the requested kinds at `time`.
    #[must_use]
    pub fn populate(
        lists: &ProductionEventLists,
        time: DateTime<Utc>,
        control: EventPopulationControl,
    ) -> Self {
        let mut snap = Self::default();
        if control.design_name {
            snap.design_name = lists.design_name.value_at(time).copied();
        }
        if control.vibration_state {
            snap.vibration_state = lists.vibration_state.value_at(time).copied();
        }
        if control.machine_gear {
            snap.machine_gear = lists.machine_gear.value_at(time).copied();
        }
        if control.automatics {
            snap.automatics = lists.automatics.value_at(time).copied();
        }
        if control.elevation_mapping {
            snap.elevation_mapping = lists.elevation_mapping.value_at(time).copied();
        }
        if control.gps_accuracy {
            snap.gps_accuracy = lists.gps_accuracy.value_at(time).copied();
        }
        if control.positioning_tech {
            snap.positioning_tech = lists.positioning_tech.value_at(time).copied();
        }
        if control.layer_id {
            snap.layer_id = lists.layer_id.value_at(time).copied();
        }
        if control.targets {
            snap.target_ccv = lists.target_ccv.value_at(time).copied();
            snap.target_mdp = lists.target_mdp.value_at(time).copied();
            snap.target_cca = lists.target_cca.value_at(time).copied();
            snap.target_pass_count = lists.target_pass_count.value_at(time).copied();
        }
        snap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_populate_only_requested_kinds() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut lists = ProductionEventLists::default();
        lists.vibration_state.put(t, VibrationState::On);
        lists.layer_id.put(t, 3);

        let control = EventPopulationControl {
            vibration_state: true,
            ..Default::default()
        };
        let snap = EventSnapshot::populate(&lists, t, control);
        assert_eq!(snap.vibration_state, Some(VibrationState::On));
        assert_eq!(snap.layer_id, None);
        assert!(control.any());
        assert!(!EventPopulationControl::default().any());
    }
}
