//! Cell passes: one machine measurement at one grid cell.
//!
//! A pass is immutable once committed. Newer passes supersede older ones
//! logically; nothing is overwritten in place except an exact duplicate
//! (same time, same machine) redelivered by a retried ingest.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dense per-site-model machine number.
pub type MachineIndex = u16;

/// Which part of the machine recorded the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PassType {
    /// Front drum or blade.
    Front,
    /// Rear drum.
    Rear,
    /// Track.
    Track,
    /// Wheel.
    Wheel,
}

impl PassType {
    /// Returns the single-member set for this pass type.
    #[must_use]
    pub const fn as_set(self) -> PassTypeSet {
        match self {
            Self::Front => PassTypeSet::FRONT,
            Self::Rear => PassTypeSet::REAR,
            Self::Track => PassTypeSet::TRACK,
            Self::Wheel => PassTypeSet::WHEEL,
        }
    }

    /// Stable wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Front => 0,
            Self::Rear => 1,
            Self::Track => 2,
            Self::Wheel => 3,
        }
    }

    /// Decodes a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Front),
            1 => Some(Self::Rear),
            2 => Some(Self::Track),
            3 => Some(Self::Wheel),
            _ => None,
        }
    }
}

bitflags! {
    /// A set of pass types accepted by a filter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct PassTypeSet: u8 {
        /// Front drum or blade passes.
        const FRONT = 0b0001;
        /// Rear drum passes.
        const REAR = 0b0010;
        /// Track passes.
        const TRACK = 0b0100;
        /// Wheel passes.
        const WHEEL = 0b1000;
    }
}

/// GPS solution quality recorded with a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GpsMode {
    /// Legacy position.
    Old,
    /// Autonomous position.
    Autonomous,
    /// RTK float solution.
    Float,
    /// RTK fixed solution.
    Fixed,
    /// Differential GPS.
    Dgps,
    /// Satellite-based augmentation.
    Sbas,
    /// Location RTK.
    LocationRtk,
}

impl GpsMode {
    /// Stable wire code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Old => 0,
            Self::Autonomous => 1,
            Self::Float => 2,
            Self::Fixed => 3,
            Self::Dgps => 4,
            Self::Sbas => 5,
            Self::LocationRtk => 6,
        }
    }

    /// Decodes a wire code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Old),
            1 => Some(Self::Autonomous),
            2 => Some(Self::Float),
            3 => Some(Self::Fixed),
            4 => Some(Self::Dgps),
            5 => Some(Self::Sbas),
            6 => Some(Self::LocationRtk),
            _ => None,
        }
    }
}

/// One machine measurement at one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellPass {
    /// When the measurement was taken.
    pub time: DateTime<Utc>,
    /// Surface elevation in metres.
    pub height: f32,
    /// Machine that recorded the pass, in the owning site model's numbering.
    pub internal_machine_index: MachineIndex,
    /// Part of the machine that recorded the pass.
    pub pass_type: PassType,
    /// True if the pass covered only half the cell width.
    pub half_pass: bool,
    /// Compaction meter value.
    pub ccv: Option<i16>,
    /// Machine drive power.
    pub mdp: Option<i16>,
    /// Compaction count accumulation.
    pub cca: Option<u8>,
    /// Material temperature in tenths of a degree.
    pub material_temperature: Option<u16>,
    /// Vibration frequency in tenths of a hertz.
    pub frequency: Option<u16>,
    /// Vibration amplitude in hundredths of a millimetre.
    pub amplitude: Option<u16>,
    /// Ground speed in centimetres per second.
    pub machine_speed: Option<u16>,
    /// GPS solution quality.
    pub gps_mode: Option<GpsMode>,
    /// Resonance meter value.
    pub rmv: Option<i16>,
    /// Radio latency in seconds.
    pub radio_latency: Option<u8>,
}

impl CellPass {
    /// Creates a full front pass with only time, height and machine set.
    #[must_use]
    pub fn new(time: DateTime<Utc>, height: f32, internal_machine_index: MachineIndex) -> Self {
        Self {
            time,
            height,
            internal_machine_index,
            pass_type: PassType::Front,
            half_pass: false,
            ccv: None,
            mdp: None,
            cca: None,
            material_temperature: None,
            frequency: None,
            amplitude: None,
            machine_speed: None,
            gps_mode: None,
            rmv: None,
            radio_latency: None,
        }
    }

    /// Returns the pass time in microseconds since the Unix epoch.
    #[must_use]
    pub fn time_micros(&self) -> i64 {
        self.time.timestamp_micros()
    }

    /// Returns a copy of this pass attributed to another machine index.
    #[must_use]
    pub const fn with_machine_index(mut self, index: MachineIndex) -> Self {
        self.internal_machine_index = index;
        self
    }

    /// Sets the pass type.
    #[must_use]
    pub const fn with_pass_type(mut self, pass_type: PassType) -> Self {
        self.pass_type = pass_type;
        self
    }

    /// Marks the pass as a half pass.
    #[must_use]
    pub const fn with_half_pass(mut self, half_pass: bool) -> Self {
        self.half_pass = half_pass;
        self
    }

    /// Sets the compaction meter value.
    #[must_use]
    pub const fn with_ccv(mut self, ccv: i16) -> Self {
        self.ccv = Some(ccv);
        self
    }

    /// Sets the machine drive power.
    #[must_use]
    pub const fn with_mdp(mut self, mdp: i16) -> Self {
        self.mdp = Some(mdp);
        self
    }

    /// Sets the compaction count accumulation.
    #[must_use]
    pub const fn with_cca(mut self, cca: u8) -> Self {
        self.cca = Some(cca);
        self
    }

    /// Sets the material temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: u16) -> Self {
        self.material_temperature = Some(temperature);
        self
    }

    /// Sets the machine speed.
    #[must_use]
    pub const fn with_machine_speed(mut self, speed: u16) -> Self {
        self.machine_speed = Some(speed);
        self
    }

    /// Sets the vibration frequency and amplitude.
    #[must_use]
    pub const fn with_vibration(mut self, frequency: u16, amplitude: u16) -> Self {
        self.frequency = Some(frequency);
        self.amplitude = Some(amplitude);
        self
    }

    /// Sets the GPS mode.
    #[must_use]
    pub const fn with_gps_mode(mut self, mode: GpsMode) -> Self {
        self.gps_mode = Some(mode);
        self
    }

    /// Returns true if both passes describe the same measurement event.
    ///
    /// Two passes collide when recorded by the same machine at the same
    /// instant; the later delivery replaces the earlier one.
    #[must_use]
    pub fn same_event(&self, other: &Self) -> bool {
        self.time == other.time && self.internal_machine_index == other.internal_machine_index
    }
}

/// Counts from [`merge_into_stack`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StackMerge {
    /// Passes new to the stack.
    pub added: usize,
    /// Existing passes overwritten by a redelivery with different content.
    pub replaced: usize,
}

impl StackMerge {
    /// True if the stack content changed.
    #[must_use]
    pub const fn changed(&self) -> bool {
        self.added > 0 || self.replaced > 0
    }
}

/// Merges `incoming` into the time-ordered `stack`.
///
/// Both inputs may arrive in any order; the result is sorted by time with
/// ties broken by machine index. A pass colliding with an existing one (see
/// [`CellPass::same_event`]) replaces it; an identical redelivery counts as
/// neither added nor replaced.
pub fn merge_into_stack(stack: &mut Vec<CellPass>, incoming: &[CellPass]) -> StackMerge {
    let mut merge = StackMerge::default();
    for pass in incoming {
        match stack.binary_search_by(|p| {
            p.time
                .cmp(&pass.time)
                .then(p.internal_machine_index.cmp(&pass.internal_machine_index))
        }) {
            Ok(pos) if stack[pos] == *pass => {}
            Ok(pos) => {
                stack[pos] = *pass;
                merge.replaced += 1;
            }
            Err(pos) => {
                stack.insert(pos, *pass);
                merge.added += 1;
            }
        }
    }
    merge
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_merge_keeps_time_order() {
        let mut stack = vec![CellPass::new(at(10), 1.0, 0), CellPass::new(at(30), 3.0, 0)];
        let merge = merge_into_stack(
            &mut stack,
            &[CellPass::new(at(20), 2.0, 0), CellPass::new(at(5), 0.5, 1)],
        );

        assert_eq!(merge.added, 2);
        let heights: Vec<f32> = stack.iter().map(|p| p.height).collect();
        assert_eq!(heights, vec![0.5, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_merge_replaces_redelivered_pass() {
        let mut stack = vec![CellPass::new(at(10), 1.0, 2)];
        let merge = merge_into_stack(&mut stack, &[CellPass::new(at(10), 1.5, 2)]);

        assert_eq!(merge, StackMerge { added: 0, replaced: 1 });
        assert_eq!(stack.len(), 1);
        assert!((stack[0].height - 1.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_identical_redelivery_changes_nothing() {
        let mut stack = vec![CellPass::new(at(10), 1.0, 2), CellPass::new(at(20), 2.0, 2)];
        let redelivered = stack.clone();
        let merge = merge_into_stack(&mut stack, &redelivered);

        assert!(!merge.changed());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_same_time_different_machine_is_kept() {
        let mut stack = vec![CellPass::new(at(10), 1.0, 0)];
        merge_into_stack(&mut stack, &[CellPass::new(at(10), 2.0, 1)]);
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_pass_type_codes_roundtrip() {
        for t in [PassType::Front, PassType::Rear, PassType::Track, PassType::Wheel] {
            assert_eq!(PassType::from_code(t.code()), Some(t));
        }
        assert!(PassTypeSet::all().contains(PassType::Wheel.as_set()));
    }
}
