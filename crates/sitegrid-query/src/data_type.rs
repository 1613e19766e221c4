//! Attribute types a tile can be requested for.

use std::fmt;

use serde::{Deserialize, Serialize};
use sitegrid_store::latest::PassAttribute;

/// The attribute a retrieval resolves per cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridDataType {
    /// Surface elevation.
    Height,
    /// Surface elevation with the time of the supplying pass.
    HeightAndTime,
    /// First, last, lowest and highest elevations.
    CompositeHeights,
    /// Production elevation minus design elevation.
    CutFill,
    /// Compaction meter value with target.
    Ccv,
    /// Machine drive power with target.
    Mdp,
    /// Compaction count accumulation with target.
    Cca,
    /// Number of passes with target.
    PassCount,
    /// Material temperature.
    Temperature,
    /// Machine speed.
    MachineSpeed,
    /// Vibration frequency.
    Frequency,
    /// Vibration amplitude.
    Amplitude,
    /// GPS mode.
    GpsMode,
    /// Layer summary of the cell.
    CellProfile,
    /// Every accepted pass.
    CellPasses,
}

impl GridDataType {
    /// The attribute a pass must carry to contribute.
    #[must_use]
    pub const fn pass_attribute(self) -> PassAttribute {
        match self {
            Self::Height
            | Self::HeightAndTime
            | Self::CompositeHeights
            | Self::CutFill
            | Self::PassCount
            | Self::CellProfile
            | Self::CellPasses => PassAttribute::Height,
            Self::Ccv => PassAttribute::Ccv,
            Self::Mdp => PassAttribute::Mdp,
            Self::Cca => PassAttribute::Cca,
            Self::Temperature => PassAttribute::Temperature,
            Self::MachineSpeed => PassAttribute::MachineSpeed,
            Self::Frequency => PassAttribute::Frequency,
            Self::Amplitude => PassAttribute::Amplitude,
            Self::GpsMode => PassAttribute::GpsMode,
        }
    }

    /// True if a tile declared as `self` can be filled by a retriever
    /// configured for `configured`.
    ///
    /// Elevation-derived tiles (cut/fill, height with time) are filled from
    /// height storage.
    #[must_use]
    pub fn is_compatible_with(self, configured: Self) -> bool {
        self == configured
            || (configured == Self::Height && matches!(self, Self::CutFill | Self::HeightAndTime))
    }

    /// True if the latest-value cache may answer this type.
    #[must_use]
    pub const fn shortcut_eligible(self) -> bool {
        !matches!(
            self,
            Self::PassCount
                | Self::Temperature
                | Self::CellProfile
                | Self::CellPasses
                | Self::MachineSpeed
                | Self::CompositeHeights
        )
    }

    /// True for compaction summary types.
    #[must_use]
    pub const fn is_compaction_summary(self) -> bool {
        matches!(self, Self::Ccv | Self::Mdp | Self::Cca)
    }

    /// True if lift analysis can apply to this type.
    #[must_use]
    pub const fn supports_lift_analysis(self) -> bool {
        matches!(
            self,
            Self::Ccv
                | Self::Mdp
                | Self::Cca
                | Self::PassCount
                | Self::Temperature
                | Self::CellProfile
                | Self::CellPasses
        )
    }

    /// True if cells carry the machine target in force at the selected pass.
    #[must_use]
    pub const fn needs_targets(self) -> bool {
        matches!(self, Self::Ccv | Self::Mdp | Self::Cca | Self::PassCount)
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Height => "Height",
            Self::HeightAndTime => "HeightAndTime",
            Self::CompositeHeights => "CompositeHeights",
            Self::CutFill => "CutFill",
            Self::Ccv => "Ccv",
            Self::Mdp => "Mdp",
            Self::Cca => "Cca",
            Self::PassCount => "PassCount",
            Self::Temperature => "Temperature",
            Self::MachineSpeed => "MachineSpeed",
            Self::Frequency => "Frequency",
            Self::Amplitude => "Amplitude",
            Self::GpsMode => "GpsMode",
            Self::CellProfile => "CellProfile",
            Self::CellPasses => "CellPasses",
        }
    }
}

impl fmt::Display for GridDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
