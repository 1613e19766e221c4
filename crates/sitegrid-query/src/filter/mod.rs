//! Cell pass attribute filter.
//!
//! A filter is a bundle of independently enabled predicates. Each predicate
//! is an `Option`: `Some` means enabled with the given parameters, `None`
//! means "don't care". A cleared filter accepts every pass.
//!
//! The filter itself is plain configuration. Call [`CellPassAttributeFilter::prepare`]
//! against a machine roster to obtain a [`PreparedFilter`] that evaluates
//! passes.

pub mod codec;
pub mod pass_count;
pub mod prepared;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitegrid_core::{MachineUid, SurveyedSurfaceUid};
use sitegrid_store::PassTypeSet;
use sitegrid_store::design::{DesignNameId, DesignRef};
use sitegrid_store::event_snapshot::EventPopulationControl;
use sitegrid_store::events::{
    AutomaticsMode, ElevationMappingMode, GpsAccuracy, PositioningTech, VibrationState,
};

pub use prepared::{FilteredPassData, PreparedFilter};

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    /// First accepted instant.
    pub start: DateTime<Utc>,
    /// Last accepted instant.
    pub end: DateTime<Utc>,
}

/// Direction of travel derived from the machine gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MachineDirection {
    /// Forward gears.
    Forward,
    /// Reverse gears.
    Reverse,
}

/// Which pass of a cell supplies an elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElevationType {
    /// Earliest accepted pass.
    First,
    /// Latest accepted pass.
    Last,
    /// Highest accepted pass.
    Highest,
    /// Lowest accepted pass.
    Lowest,
}

/// GPS accuracy predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GpsAccuracyFilter {
    /// Accuracy class to compare with.
    pub accuracy: GpsAccuracy,
    /// Accept this class and any finer one.
    pub inclusive: bool,
}

/// GPS tolerance predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GpsToleranceFilter {
    /// Tolerance in millimetres.
    pub tolerance_mm: u16,
    /// Accept tolerances strictly greater than `tolerance_mm` instead of
    /// those at or below it.
    pub greater_than: bool,
}

/// Elevation band a pass height must fall in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ElevationRange {
    /// Band below a fixed level.
    Level {
        /// Reference level.
        level: f64,
        /// Offset added to the level to give the band top.
        offset: f64,
        /// Band thickness below the top.
        thickness: f64,
    },
    /// Band below a design surface.
    Design {
        /// Design surface.
        design: DesignRef,
        /// Offset added to the design sample to give the band top.
        offset: f64,
        /// Band thickness below the top.
        thickness: f64,
    },
}

impl ElevationRange {
    fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Level {
                    level: l1,
                    offset: o1,
                    thickness: t1,
                },
                Self::Level {
                    level: l2,
                    offset: o2,
                    thickness: t2,
                },
            ) => l1
                .total_cmp(l2)
                .then(o1.total_cmp(o2))
                .then(t1.total_cmp(t2)),
            (Self::Level { .. }, Self::Design { .. }) => Ordering::Less,
            (Self::Design { .. }, Self::Level { .. }) => Ordering::Greater,
            (
                Self::Design {
                    design: d1,
                    offset: o1,
                    thickness: t1,
                },
                Self::Design {
                    design: d2,
                    offset: o2,
                    thickness: t2,
                },
            ) => d1
                .design
                .cmp(&d2.design)
                .then(d1.offset.total_cmp(&d2.offset))
                .then(o1.total_cmp(o2))
                .then(t1.total_cmp(t2)),
        }
    }
}

/// Layer analysis switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LayerState {
    /// Force lift analysis on.
    On,
    /// Force lift analysis off.
    Off,
}

/// Inclusive material temperature range, in tenths of a degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TemperatureRange {
    /// Lowest accepted temperature.
    pub min: u16,
    /// Highest accepted temperature.
    pub max: u16,
}

/// Inclusive pass ordinal range, counted in full passes from the oldest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PassCountRange {
    /// First accepted ordinal (1-based).
    pub min: u16,
    /// Last accepted ordinal.
    pub max: u16,
}

/// The predicate bundle.
///
/// Fields are listed in compare and serialization order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellPassAttributeFilter {
    time_range: Option<TimeRange>,
    design_name: Option<DesignNameId>,
    machines: Option<Vec<MachineUid>>,
    direction: Option<MachineDirection>,
    pass_types: Option<PassTypeSet>,
    vibration_state: Option<VibrationState>,
    min_elevation_mapping: Option<ElevationMappingMode>,
    elevation_type: Option<ElevationType>,
    surveyed_surface_exclusions: Option<Vec<SurveyedSurfaceUid>>,
    guidance_mode: Option<AutomaticsMode>,
    gps_accuracy: Option<GpsAccuracyFilter>,
    gps_tolerance: Option<GpsToleranceFilter>,
    positioning_tech: Option<PositioningTech>,
    elevation_range: Option<ElevationRange>,
    layer_state: Option<LayerState>,
    compaction_machines_only: bool,
    layer_id: Option<u16>,
    temperature_range: Option<TemperatureRange>,
    pass_count_range: Option<PassCountRange>,
    return_earliest: bool,
}

macro_rules! predicate {
    ($field:ident: $ty:ty, $set:ident, $clear:ident, $has:ident, $what:literal) => {
        #[doc = concat!("Enables the ", $what, " predicate.")]
        pub fn $set(&mut self, value: $ty) {
            self.$field = Some(value);
        }

        #[doc = concat!("Disables the ", $what, " predicate.")]
        pub fn $clear(&mut self) {
            self.$field = None;
        }

        #[doc = concat!("True if the ", $what, " predicate is enabled.")]
        #[must_use]
        pub const fn $has(&self) -> bool {
            self.$field.is_some()
        }
    };
}

fn cmp_option<T>(a: Option<&T>, b: Option<&T>, f: impl FnOnce(&T, &T) -> Ordering) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => f(x, y),
    }
}

impl CellPassAttributeFilter {
    /// Creates a filter accepting every pass.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets every predicate to "don't care".
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    predicate!(
        time_range: TimeRange,
        set_time_range,
        clear_time_range,
        has_time_range,
        "time range"
    );
    predicate!(
        design_name: DesignNameId,
        set_design_name,
        clear_design_name,
        has_design_name,
        "design name"
    );
    predicate!(
        machines: Vec<MachineUid>,
        set_machines,
        clear_machines,
        has_machines,
        "machine set"
    );
    predicate!(
        direction: MachineDirection,
        set_direction,
        clear_direction,
        has_direction,
        "machine direction"
    );
    predicate!(
        pass_types: PassTypeSet,
        set_pass_types,
        clear_pass_types,
        has_pass_types,
        "pass type"
    );
    predicate!(
        vibration_state: VibrationState,
        set_vibration_state,
        clear_vibration_state,
        has_vibration_state,
        "vibration state"
    );
    predicate!(
        min_elevation_mapping: ElevationMappingMode,
        set_min_elevation_mapping,
        clear_min_elevation_mapping,
        has_min_elevation_mapping,
        "elevation mapping mode"
    );
    predicate!(
        elevation_type: ElevationType,
        set_elevation_type,
        clear_elevation_type,
        has_elevation_type,
        "elevation type"
    );
    predicate!(
        surveyed_surface_exclusions: Vec<SurveyedSurfaceUid>,
        set_surveyed_surface_exclusions,
        clear_surveyed_surface_exclusions,
        has_surveyed_surface_exclusions,
        "surveyed surface exclusion"
    );
    predicate!(
        guidance_mode: AutomaticsMode,
        set_guidance_mode,
        clear_guidance_mode,
        has_guidance_mode,
        "guidance mode"
    );
    predicate!(
        gps_accuracy: GpsAccuracyFilter,
        set_gps_accuracy,
        clear_gps_accuracy,
        has_gps_accuracy,
        "GPS accuracy"
    );
    predicate!(
        gps_tolerance: GpsToleranceFilter,
        set_gps_tolerance,
        clear_gps_tolerance,
        has_gps_tolerance,
        "GPS tolerance"
    );
    predicate!(
        positioning_tech: PositioningTech,
        set_positioning_tech,
        clear_positioning_tech,
        has_positioning_tech,
        "positioning technology"
    );
    predicate!(
        elevation_range: ElevationRange,
        set_elevation_range,
        clear_elevation_range,
        has_elevation_range,
        "elevation range"
    );
    predicate!(
        layer_state: LayerState,
        set_layer_state,
        clear_layer_state,
        has_layer_state,
        "layer state"
    );
    predicate!(layer_id: u16, set_layer_id, clear_layer_id, has_layer_id, "layer id");
    predicate!(
        temperature_range: TemperatureRange,
        set_temperature_range,
        clear_temperature_range,
        has_temperature_range,
        "temperature range"
    );
    predicate!(
        pass_count_range: PassCountRange,
        set_pass_count_range,
        clear_pass_count_range,
        has_pass_count_range,
        "pass count range"
    );

    /// Restricts passes to compaction machines.
    pub fn set_compaction_machines_only(&mut self) {
        self.compaction_machines_only = true;
    }

    /// Lifts the compaction-machine restriction.
    pub fn clear_compaction_machines_only(&mut self) {
        self.compaction_machines_only = false;
    }

    /// True if only compaction machines are accepted.
    #[must_use]
    pub const fn has_compaction_machines_only(&self) -> bool {
        self.compaction_machines_only
    }

    /// Selects the earliest rather than the latest qualifying pass.
    pub fn set_return_earliest(&mut self, earliest: bool) {
        self.return_earliest = earliest;
    }

    /// True if the earliest qualifying pass is selected.
    #[must_use]
    pub const fn return_earliest(&self) -> bool {
        self.return_earliest
    }

    /// Time range, if enabled.
    #[must_use]
    pub const fn time_range(&self) -> Option<&TimeRange> {
        self.time_range.as_ref()
    }

    /// Design name id, if enabled.
    #[must_use]
    pub const fn design_name(&self) -> Option<DesignNameId> {
        self.design_name
    }

    /// Selected machines, if enabled.
    #[must_use]
    pub fn machines(&self) -> Option<&[MachineUid]> {
        self.machines.as_deref()
    }

    /// Direction, if enabled.
    #[must_use]
    pub const fn direction(&self) -> Option<MachineDirection> {
        self.direction
    }

    /// Accepted pass types, if enabled.
    #[must_use]
    pub const fn pass_types(&self) -> Option<PassTypeSet> {
        self.pass_types
    }

    /// Vibration state, if enabled.
    #[must_use]
    pub const fn vibration_state(&self) -> Option<VibrationState> {
        self.vibration_state
    }

    /// Elevation mapping mode, if enabled.
    #[must_use]
    pub const fn min_elevation_mapping(&self) -> Option<ElevationMappingMode> {
        self.min_elevation_mapping
    }

    /// Elevation type, if enabled.
    #[must_use]
    pub const fn elevation_type(&self) -> Option<ElevationType> {
        self.elevation_type
    }

    /// Excluded surveyed surfaces, if enabled.
    #[must_use]
    pub fn surveyed_surface_exclusions(&self) -> Option<&[SurveyedSurfaceUid]> {
        self.surveyed_surface_exclusions.as_deref()
    }

    /// Guidance mode, if enabled.
    #[must_use]
    pub const fn guidance_mode(&self) -> Option<AutomaticsMode> {
        self.guidance_mode
    }

    /// GPS accuracy predicate, if enabled.
    #[must_use]
    pub const fn gps_accuracy(&self) -> Option<GpsAccuracyFilter> {
        self.gps_accuracy
    }

    /// GPS tolerance predicate, if enabled.
    #[must_use]
    pub const fn gps_tolerance(&self) -> Option<GpsToleranceFilter> {
        self.gps_tolerance
    }

    /// Positioning technology, if enabled.
    #[must_use]
    pub const fn positioning_tech(&self) -> Option<PositioningTech> {
        self.positioning_tech
    }

    /// Elevation range, if enabled.
    #[must_use]
    pub const fn elevation_range(&self) -> Option<&ElevationRange> {
        self.elevation_range.as_ref()
    }

    /// Layer state, if enabled.
    #[must_use]
    pub const fn layer_state(&self) -> Option<LayerState> {
        self.layer_state
    }

    /// Layer id, if enabled.
    #[must_use]
    pub const fn layer_id(&self) -> Option<u16> {
        self.layer_id
    }

    /// Temperature range, if enabled.
    #[must_use]
    pub const fn temperature_range(&self) -> Option<TemperatureRange> {
        self.temperature_range
    }

    /// Pass count range, if enabled.
    #[must_use]
    pub const fn pass_count_range(&self) -> Option<PassCountRange> {
        self.pass_count_range
    }

    /// True if any predicate is enabled.
    #[must_use]
    pub const fn any_filter_selections(&self) -> bool {
        self.has_time_range()
            || self.has_design_name()
            || self.has_machines()
            || self.has_direction()
            || self.has_pass_types()
            || self.has_vibration_state()
            || self.has_min_elevation_mapping()
            || self.has_elevation_type()
            || self.has_surveyed_surface_exclusions()
            || self.has_guidance_mode()
            || self.has_gps_accuracy()
            || self.has_gps_tolerance()
            || self.has_positioning_tech()
            || self.has_elevation_range()
            || self.has_layer_state()
            || self.compaction_machines_only
            || self.has_layer_id()
            || self.has_temperature_range()
            || self.has_pass_count_range()
    }

    /// True if evaluating the filter needs machine event state.
    #[must_use]
    pub const fn any_machine_event_filtering(&self) -> bool {
        self.has_design_name()
            || self.has_direction()
            || self.has_vibration_state()
            || self.has_min_elevation_mapping()
            || self.has_guidance_mode()
            || self.has_gps_accuracy()
            || self.has_gps_tolerance()
            || self.has_positioning_tech()
            || self.has_layer_id()
    }

    /// True if the latest-value cache can answer this filter.
    ///
    /// Only machine-set, pass-type and compaction-only predicates can be
    /// checked against a cached value; anything temporal, event-dependent,
    /// elevation-banded, counted or layered needs the stack.
    #[must_use]
    pub fn supports_last_value_shortcut(&self) -> bool {
        !self.has_time_range()
            && !self.any_machine_event_filtering()
            && !self.has_elevation_range()
            && !self.has_pass_count_range()
            && !self.has_layer_state()
            && !self.has_temperature_range()
            && !self.return_earliest
            && matches!(self.elevation_type, None | Some(ElevationType::Last))
    }

    /// Event kinds a full scan must populate for this filter.
    #[must_use]
    pub const fn event_population(&self) -> EventPopulationControl {
        EventPopulationControl {
            design_name: self.has_design_name(),
            vibration_state: self.has_vibration_state(),
            machine_gear: self.has_direction(),
            automatics: self.has_guidance_mode(),
            elevation_mapping: self.has_min_elevation_mapping() || self.has_pass_count_range(),
            gps_accuracy: self.has_gps_accuracy() || self.has_gps_tolerance(),
            positioning_tech: self.has_positioning_tech(),
            layer_id: self.has_layer_id(),
            targets: false,
        }
    }

    /// Total order over filters, for use as a cache key.
    ///
    /// Predicates are compared in serialization order; a disabled predicate
    /// orders before an enabled one, and contents are only compared when
    /// both sides enable the predicate.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        cmp_option(self.time_range.as_ref(), other.time_range.as_ref(), Ord::cmp)
            .then_with(|| {
                cmp_option(self.design_name.as_ref(), other.design_name.as_ref(), Ord::cmp)
            })
            .then_with(|| cmp_option(self.machines.as_ref(), other.machines.as_ref(), Ord::cmp))
            .then_with(|| cmp_option(self.direction.as_ref(), other.direction.as_ref(), Ord::cmp))
            .then_with(|| cmp_option(self.pass_types.as_ref(), other.pass_types.as_ref(), Ord::cmp))
            .then_with(|| {
                cmp_option(self.vibration_state.as_ref(), other.vibration_state.as_ref(), Ord::cmp)
            })
            .then_with(|| {
                cmp_option(
                    self.min_elevation_mapping.as_ref(),
                    other.min_elevation_mapping.as_ref(),
                    Ord::cmp,
                )
            })
            .then_with(|| {
                cmp_option(self.elevation_type.as_ref(), other.elevation_type.as_ref(), Ord::cmp)
            })
            .then_with(|| {
                cmp_option(
                    self.surveyed_surface_exclusions.as_ref(),
                    other.surveyed_surface_exclusions.as_ref(),
                    Ord::cmp,
                )
            })
            .then_with(|| {
                cmp_option(self.guidance_mode.as_ref(), other.guidance_mode.as_ref(), Ord::cmp)
            })
            .then_with(|| {
                cmp_option(self.gps_accuracy.as_ref(), other.gps_accuracy.as_ref(), Ord::cmp)
            })
            .then_with(|| {
                cmp_option(self.gps_tolerance.as_ref(), other.gps_tolerance.as_ref(), Ord::cmp)
            })
            .then_with(|| {
                cmp_option(
                    self.positioning_tech.as_ref(),
                    other.positioning_tech.as_ref(),
                    Ord::cmp,
                )
            })
            .then_with(|| {
                cmp_option(
                    self.elevation_range.as_ref(),
                    other.elevation_range.as_ref(),
                    ElevationRange::total_cmp,
                )
            })
            .then_with(|| {
                cmp_option(self.layer_state.as_ref(), other.layer_state.as_ref(), Ord::cmp)
            })
            .then_with(|| self.compaction_machines_only.cmp(&other.compaction_machines_only))
            .then_with(|| cmp_option(self.layer_id.as_ref(), other.layer_id.as_ref(), Ord::cmp))
            .then_with(|| {
                cmp_option(
                    self.temperature_range.as_ref(),
                    other.temperature_range.as_ref(),
                    Ord::cmp,
                )
            })
            .then_with(|| {
                cmp_option(
                    self.pass_count_range.as_ref(),
                    other.pass_count_range.as_ref(),
                    Ord::cmp,
                )
            })
            .then_with(|| self.return_earliest.cmp(&other.return_earliest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleared_filter_has_no_selections() {
        let mut filter = CellPassAttributeFilter::new();
        filter.set_layer_id(3);
        filter.set_compaction_machines_only();
        assert!(filter.any_filter_selections());

        filter.clear();
        assert!(!filter.any_filter_selections());
        assert_eq!(filter, CellPassAttributeFilter::default());
    }

    #[test]
    fn test_set_and_clear_toggle_has_flag() {
        let mut filter = CellPassAttributeFilter::new();
        filter.set_vibration_state(VibrationState::On);
        assert!(filter.has_vibration_state());
        filter.clear_vibration_state();
        assert!(!filter.has_vibration_state());
        assert_eq!(filter.vibration_state(), None);
    }

    #[test]
    fn test_disabled_orders_before_enabled() {
        let plain = CellPassAttributeFilter::new();
        let mut layered = CellPassAttributeFilter::new();
        layered.set_layer_id(0);
        assert_eq!(plain.compare(&layered), Ordering::Less);
        assert_eq!(layered.compare(&plain), Ordering::Greater);
        assert_eq!(layered.compare(&layered.clone()), Ordering::Equal);
    }

    #[test]
    fn test_compare_follows_predicate_order() {
        let mut a = CellPassAttributeFilter::new();
        a.set_design_name(9);
        let mut b = CellPassAttributeFilter::new();
        b.set_pass_count_range(PassCountRange { min: 1, max: 1 });
        b.set_layer_id(1);
        // design name precedes pass count range in compare order
        assert_eq!(a.compare(&b), Ordering::Greater);
    }

    #[test]
    fn test_shortcut_allows_machine_predicates_only() {
        let mut filter = CellPassAttributeFilter::new();
        filter.set_machines(vec![MachineUid::generate()]);
        filter.set_pass_types(PassTypeSet::FRONT | PassTypeSet::REAR);
        filter.set_compaction_machines_only();
        assert!(filter.supports_last_value_shortcut());

        filter.set_elevation_type(ElevationType::Lowest);
        assert!(!filter.supports_last_value_shortcut());
        filter.set_elevation_type(ElevationType::Last);
        filter.set_vibration_state(VibrationState::On);
        assert!(!filter.supports_last_value_shortcut());
    }
}
