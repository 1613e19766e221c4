//! Per-machine production event lists.
//!
//! Each list records the state of one machine setting over time. The state
//! in force at time `t` is the value of the last event at or before `t`.
//! Lists are collated relative to recording intervals: an event repeating
//! the previous value is redundant unless a recording start lies between
//! them, in which case it re-establishes state after a gap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::design::DesignNameId;

/// One state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionEvent<T> {
    /// When the state took effect.
    pub time: DateTime<Utc>,
    /// The new state.
    pub value: T,
}

/// A time-ordered list of state changes of one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductionEventList<T> {
    events: Vec<ProductionEvent<T>>,
}

impl<T> Default for ProductionEventList<T> {
    fn default() -> Self {
        Self { events: Vec::new() }
    }
}

impl<T: Clone + PartialEq> ProductionEventList<T> {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event without re-sorting.
    pub fn put(&mut self, time: DateTime<Utc>, value: T) {
        self.events.push(ProductionEvent { time, value });
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the list holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events in stored order.
    #[must_use]
    pub fn events(&self) -> &[ProductionEvent<T>] {
        &self.events
    }

    /// The latest event.
    #[must_use]
    pub fn last(&self) -> Option<&ProductionEvent<T>> {
        self.events.last()
    }

    fn is_sorted_by_time(&self) -> bool {
        self.events.windows(2).all(|w| w[0].time <= w[1].time)
    }

    /// Stable-sorts events by time.
    pub fn sort(&mut self) {
        if !self.is_sorted_by_time() {
            self.events.sort_by_key(|e| e.time);
        }
    }

    /// The event in force at `time`. The list must be sorted.
    #[must_use]
    pub fn event_at(&self, time: DateTime<Utc>) -> Option<&ProductionEvent<T>> {
        let idx = self.events.partition_point(|e| e.time <= time);
        idx.checked_sub(1).map(|i| &self.events[i])
    }

    /// The state in force at `time`. The list must be sorted.
    #[must_use]
    pub fn value_at(&self, time: DateTime<Utc>) -> Option<&T> {
        self.event_at(time).map(|e| &e.value)
    }

    /// Returns a list with every value rewritten through `f`.
    #[must_use]
    pub fn map_values<U>(&self, f: impl Fn(&T) -> U) -> ProductionEventList<U> {
        ProductionEventList {
            events: self
                .events
                .iter()
                .map(|e| ProductionEvent {
                    time: e.time,
                    value: f(&e.value),
                })
                .collect(),
        }
    }

    /// Appends `incoming` and re-collates against `recording_starts`.
    pub fn merge_from(&mut self, incoming: &Self, recording_starts: &[DateTime<Utc>]) {
        if incoming.is_empty() {
            return;
        }
        let mut sorted = incoming.clone();
        sorted.sort();
        self.events.extend(sorted.events);
        self.collate(recording_starts);
    }

    /// Sorts the list and removes redundant events.
    ///
    /// Of several events at one instant the last added survives. An event
    /// equal to its predecessor is dropped unless a recording start falls in
    /// `(previous.time, event.time]`.
    pub fn collate(&mut self, recording_starts: &[DateTime<Utc>]) {
        self.sort();
        let mut kept: Vec<ProductionEvent<T>> = Vec::with_capacity(self.events.len());
        for event in self.events.drain(..) {
            if let Some(prev) = kept.last_mut() {
                if prev.time == event.time {
                    *prev = event;
                    continue;
                }
            }
            kept.push(event);
        }

        let mut collated: Vec<ProductionEvent<T>> = Vec::with_capacity(kept.len());
        for event in kept {
            if let Some(prev) = collated.last() {
                let restart = recording_starts
                    .iter()
                    .any(|s| *s > prev.time && *s <= event.time);
                if prev.value == event.value && !restart {
                    continue;
                }
            }
            collated.push(event);
        }
        self.events = collated;
    }
}

/// Recording interval boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordingEvent {
    /// Recording started.
    Start,
    /// Recording stopped.
    End,
}

impl ProductionEventList<RecordingEvent> {
    /// Sorts and enforces start/end alternation.
    ///
    /// Repeated starts keep the first; repeated ends keep the last; an end
    /// with no preceding start is dropped.
    pub fn collate_recording(&mut self) {
        self.sort();
        let mut out: Vec<ProductionEvent<RecordingEvent>> = Vec::with_capacity(self.events.len());
        for event in self.events.drain(..) {
            let Some(prev) = out.last_mut() else {
                if event.value == RecordingEvent::Start {
                    out.push(event);
                }
                continue;
            };
            let repeated = prev.value == event.value;
            if prev.time == event.time || (repeated && event.value == RecordingEvent::End) {
                *prev = event;
            } else if !repeated {
                out.push(event);
            }
        }
        self.events = out;
    }

    /// Times at which recording (re)started.
    #[must_use]
    pub fn recording_starts(&self) -> Vec<DateTime<Utc>> {
        self.events
            .iter()
            .filter(|e| e.value == RecordingEvent::Start)
            .map(|e| e.time)
            .collect()
    }
}

/// Vibration drum state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VibrationState {
    /// Vibration off.
    Off,
    /// Vibration on.
    On,
    /// Sensor reported an invalid state.
    Invalid,
}

/// Transmission gear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MachineGear {
    /// Neutral.
    Neutral,
    /// Forward.
    Forward,
    /// Reverse.
    Reverse,
    /// Park.
    Park,
    /// Gear sensor failed.
    SensorFailed,
}

/// Guidance automatics mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AutomaticsMode {
    /// Operator in control.
    Manual,
    /// Machine guidance in control.
    Automatic,
    /// Mode not reported.
    Unknown,
}

/// How a machine maps elevations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElevationMappingMode {
    /// Record the latest elevation.
    LatestElevation,
    /// Record the minimum elevation (excavators).
    MinimumElevation,
}

/// GPS accuracy class; finer classes order first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GpsAccuracy {
    /// Fine accuracy.
    Fine,
    /// Medium accuracy.
    Medium,
    /// Coarse accuracy.
    Coarse,
    /// Accuracy not reported.
    Unknown,
}

/// GPS accuracy class with the tolerance reported alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GpsAccuracyState {
    /// Accuracy class.
    pub accuracy: GpsAccuracy,
    /// Tolerance in millimetres.
    pub tolerance_mm: u16,
}

/// Positioning technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PositioningTech {
    /// Satellite positioning.
    Gps,
    /// Universal total station.
    Uts,
    /// Not reported.
    Unknown,
}

/// All event lists of one machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionEventLists {
    /// Recording start/stop boundaries.
    pub recording: ProductionEventList<RecordingEvent>,
    /// Design loaded on the machine.
    pub design_name: ProductionEventList<DesignNameId>,
    /// Vibration drum state.
    pub vibration_state: ProductionEventList<VibrationState>,
    /// Transmission gear.
    pub machine_gear: ProductionEventList<MachineGear>,
    /// Guidance mode.
    pub automatics: ProductionEventList<AutomaticsMode>,
    /// Elevation mapping mode.
    pub elevation_mapping: ProductionEventList<ElevationMappingMode>,
    /// GPS accuracy and tolerance.
    pub gps_accuracy: ProductionEventList<GpsAccuracyState>,
    /// Positioning technology.
    pub positioning_tech: ProductionEventList<PositioningTech>,
    /// Layer id entered by the operator.
    pub layer_id: ProductionEventList<u16>,
    /// Target CCV.
    pub target_ccv: ProductionEventList<i16>,
    /// Target MDP.
    pub target_mdp: ProductionEventList<i16>,
    /// Target CCA.
    pub target_cca: ProductionEventList<u8>,
    /// Target pass count.
    pub target_pass_count: ProductionEventList<u16>,
    /// Target lift thickness in metres.
    pub target_lift_thickness: ProductionEventList<f32>,
    /// Minimum target material temperature.
    pub target_min_temperature: ProductionEventList<u16>,
    /// Maximum target material temperature.
    pub target_max_temperature: ProductionEventList<u16>,
}

impl ProductionEventLists {
    /// True if no list holds events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_events() == 0
    }

    /// Events across all lists.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.recording.len()
            + self.design_name.len()
            + self.vibration_state.len()
            + self.machine_gear.len()
            + self.automatics.len()
            + self.elevation_mapping.len()
            + self.gps_accuracy.len()
            + self.positioning_tech.len()
            + self.layer_id.len()
            + self.target_ccv.len()
            + self.target_mdp.len()
            + self.target_cca.len()
            + self.target_pass_count.len()
            + self.target_lift_thickness.len()
            + self.target_min_temperature.len()
            + self.target_max_temperature.len()
    }

    /// Merges another machine's lists into these.
    ///
    /// Recording boundaries merge first; every other list is then collated
    /// against the merged boundaries. Returns true if any target-value list
    /// received events.
    pub fn merge_from(&mut self, incoming: &Self) -> bool {
        if !incoming.recording.is_empty() {
            let mut sorted = incoming.recording.clone();
            sorted.sort();
            self.recording.events.extend(sorted.events);
        }
        self.recording.collate_recording();
        let starts = self.recording.recording_starts();

        self.design_name.merge_from(&incoming.design_name, &starts);
        self.vibration_state
            .merge_from(&incoming.vibration_state, &starts);
        self.machine_gear.merge_from(&incoming.machine_gear, &starts);
        self.automatics.merge_from(&incoming.automatics, &starts);
        self.elevation_mapping
            .merge_from(&incoming.elevation_mapping, &starts);
        self.gps_accuracy.merge_from(&incoming.gps_accuracy, &starts);
        self.positioning_tech
            .merge_from(&incoming.positioning_tech, &starts);
        self.layer_id.merge_from(&incoming.layer_id, &starts);

        self.target_ccv.merge_from(&incoming.target_ccv, &starts);
        self.target_mdp.merge_from(&incoming.target_mdp, &starts);
        self.target_cca.merge_from(&incoming.target_cca, &starts);
        self.target_pass_count
            .merge_from(&incoming.target_pass_count, &starts);
        self.target_lift_thickness
            .merge_from(&incoming.target_lift_thickness, &starts);
        self.target_min_temperature
            .merge_from(&incoming.target_min_temperature, &starts);
        self.target_max_temperature
            .merge_from(&incoming.target_max_temperature, &starts);

        !(incoming.target_ccv.is_empty()
            && incoming.target_mdp.is_empty()
            && incoming.target_cca.is_empty()
            && incoming.target_pass_count.is_empty()
            && incoming.target_lift_thickness.is_empty()
            && incoming.target_min_temperature.is_empty()
            && incoming.target_max_temperature.is_empty())
    }
}
