//! Binary serialization of [`CellPassAttributeFilter`].
//!
//! Layout: a version byte, then one presence byte per predicate in compare
//! order, each followed by the predicate contents when present. Integers are
//! little endian, GUIDs are 16 raw bytes, lists carry a `u32` count prefix
//! and times are microseconds since the Unix epoch. A trailing byte holds
//! the return-earliest flag.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use sitegrid_core::{DesignUid, MachineUid, SurveyedSurfaceUid};
use sitegrid_store::PassTypeSet;
use sitegrid_store::design::DesignRef;
use sitegrid_store::events::{
    AutomaticsMode, ElevationMappingMode, GpsAccuracy, PositioningTech, VibrationState,
};

use super::{
    CellPassAttributeFilter, ElevationRange, ElevationType, GpsAccuracyFilter,
    GpsToleranceFilter, LayerState, MachineDirection, PassCountRange, TemperatureRange, TimeRange,
};
use crate::error::FilterCodecError;

/// Current filter encoding version.
pub const FILTER_CODEC_VERSION: u8 = 1;

type Result<T> = std::result::Result<T, FilterCodecError>;

macro_rules! enum_codes {
    ($ty:ident, $field:literal, $write:ident, $read:ident, [$($variant:ident = $code:literal),+ $(,)?]) => {
        fn $write(value: $ty) -> u8 {
            match value {
                $($ty::$variant => $code,)+
            }
        }

        fn $read(tag: u8) -> Result<$ty> {
            match tag {
                $($code => Ok($ty::$variant),)+
                _ => Err(FilterCodecError::InvalidTag { field: $field, tag }),
            }
        }
    };
}

enum_codes!(
    MachineDirection,
    "direction",
    direction_code,
    direction_from,
    [Forward = 0, Reverse = 1]
);
enum_codes!(
    VibrationState,
    "vibration_state",
    vibration_code,
    vibration_from,
    [Off = 0, On = 1, Invalid = 2]
);
enum_codes!(
    ElevationMappingMode,
    "min_elevation_mapping",
    mapping_code,
    mapping_from,
    [LatestElevation = 0, MinimumElevation = 1]
);
enum_codes!(
    ElevationType,
    "elevation_type",
    elevation_type_code,
    elevation_type_from,
    [First = 0, Last = 1, Highest = 2, Lowest = 3]
);
enum_codes!(
    AutomaticsMode,
    "guidance_mode",
    automatics_code,
    automatics_from,
    [Manual = 0, Automatic = 1, Unknown = 2]
);
enum_codes!(
    GpsAccuracy,
    "gps_accuracy",
    accuracy_code,
    accuracy_from,
    [Fine = 0, Medium = 1, Coarse = 2, Unknown = 3]
);
enum_codes!(
    PositioningTech,
    "positioning_tech",
    positioning_code,
    positioning_from,
    [Gps = 0, Uts = 1, Unknown = 2]
);
enum_codes!(LayerState, "layer_state", layer_state_code, layer_state_from, [On = 0, Off = 1]);

struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn time(&mut self, time: DateTime<Utc>) {
        self.buf.put_i64_le(time.timestamp_micros());
    }

    fn guid(&mut self, bytes: &[u8; 16]) {
        self.buf.put_slice(bytes);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn count(&mut self, len: usize) {
        self.buf.put_u32_le(len as u32);
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl Reader<'_> {
    fn need(&self, n: usize, field: &'static str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(FilterCodecError::Truncated { field });
        }
        Ok(())
    }

    fn u8(&mut self, field: &'static str) -> Result<u8> {
        self.need(1, field)?;
        Ok(self.buf.get_u8())
    }

    fn flag(&mut self, field: &'static str) -> Result<bool> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(FilterCodecError::InvalidTag { field, tag }),
        }
    }

    fn u16(&mut self, field: &'static str) -> Result<u16> {
        self.need(2, field)?;
        Ok(self.buf.get_u16_le())
    }

    fn i32(&mut self, field: &'static str) -> Result<i32> {
        self.need(4, field)?;
        Ok(self.buf.get_i32_le())
    }

    fn u32(&mut self, field: &'static str) -> Result<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32_le())
    }

    fn f64(&mut self, field: &'static str) -> Result<f64> {
        self.need(8, field)?;
        Ok(self.buf.get_f64_le())
    }

    fn time(&mut self, field: &'static str) -> Result<DateTime<Utc>> {
        self.need(8, field)?;
        let micros = self.buf.get_i64_le();
        DateTime::from_timestamp_micros(micros).ok_or(FilterCodecError::Truncated { field })
    }

    fn guid(&mut self, field: &'static str) -> Result<[u8; 16]> {
        self.need(16, field)?;
        let mut out = [0_u8; 16];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    fn guids(&mut self, field: &'static str) -> Result<Vec<[u8; 16]>> {
        let count = self.u32(field)? as usize;
        self.need(count.saturating_mul(16), field)?;
        (0..count).map(|_| self.guid(field)).collect()
    }

    fn optional<T>(
        &mut self,
        field: &'static str,
        read: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<Option<T>> {
        if self.flag(field)? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl CellPassAttributeFilter {
    /// Serializes the filter.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut w = Writer {
            buf: BytesMut::with_capacity(64),
        };
        w.buf.put_u8(FILTER_CODEC_VERSION);

        match self.time_range {
            Some(range) => {
                w.buf.put_u8(1);
                w.time(range.start);
                w.time(range.end);
            }
            None => w.buf.put_u8(0),
        }
        match self.design_name {
            Some(id) => {
                w.buf.put_u8(1);
                w.buf.put_i32_le(id);
            }
            None => w.buf.put_u8(0),
        }
        match &self.machines {
            Some(uids) => {
                w.buf.put_u8(1);
                w.count(uids.len());
                for uid in uids {
                    w.guid(uid.as_bytes());
                }
            }
            None => w.buf.put_u8(0),
        }
        put_code(&mut w, self.direction.map(direction_code));
        put_code(&mut w, self.pass_types.map(|s| s.bits()));
        put_code(&mut w, self.vibration_state.map(vibration_code));
        put_code(&mut w, self.min_elevation_mapping.map(mapping_code));
        put_code(&mut w, self.elevation_type.map(elevation_type_code));
        match &self.surveyed_surface_exclusions {
            Some(uids) => {
                w.buf.put_u8(1);
                w.count(uids.len());
                for uid in uids {
                    w.guid(uid.as_bytes());
                }
            }
            None => w.buf.put_u8(0),
        }
        put_code(&mut w, self.guidance_mode.map(automatics_code));
        match self.gps_accuracy {
            Some(acc) => {
                w.buf.put_u8(1);
                w.buf.put_u8(accuracy_code(acc.accuracy));
                w.buf.put_u8(u8::from(acc.inclusive));
            }
            None => w.buf.put_u8(0),
        }
        match self.gps_tolerance {
            Some(tol) => {
                w.buf.put_u8(1);
                w.buf.put_u16_le(tol.tolerance_mm);
                w.buf.put_u8(u8::from(tol.greater_than));
            }
            None => w.buf.put_u8(0),
        }
        put_code(&mut w, self.positioning_tech.map(positioning_code));
        match self.elevation_range {
            Some(ElevationRange::Level {
                level,
                offset,
                thickness,
            }) => {
                w.buf.put_u8(1);
                w.buf.put_u8(0);
                w.buf.put_f64_le(level);
                w.buf.put_f64_le(offset);
                w.buf.put_f64_le(thickness);
            }
            Some(ElevationRange::Design {
                design,
                offset,
                thickness,
            }) => {
                w.buf.put_u8(1);
                w.buf.put_u8(1);
                w.guid(design.design.as_bytes());
                w.buf.put_f64_le(design.offset);
                w.buf.put_f64_le(offset);
                w.buf.put_f64_le(thickness);
            }
            None => w.buf.put_u8(0),
        }
        put_code(&mut w, self.layer_state.map(layer_state_code));
        w.buf.put_u8(u8::from(self.compaction_machines_only));
        match self.layer_id {
            Some(id) => {
                w.buf.put_u8(1);
                w.buf.put_u16_le(id);
            }
            None => w.buf.put_u8(0),
        }
        match self.temperature_range {
            Some(range) => {
                w.buf.put_u8(1);
                w.buf.put_u16_le(range.min);
                w.buf.put_u16_le(range.max);
            }
            None => w.buf.put_u8(0),
        }
        match self.pass_count_range {
            Some(range) => {
                w.buf.put_u8(1);
                w.buf.put_u16_le(range.min);
                w.buf.put_u16_le(range.max);
            }
            None => w.buf.put_u8(0),
        }
        w.buf.put_u8(u8::from(self.return_earliest));
        w.buf.freeze()
    }

    /// Deserializes a filter written by [`CellPassAttributeFilter::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`FilterCodecError::VersionMismatch`] for an unsupported
    /// version byte, [`FilterCodecError::Truncated`] on short input and
    /// [`FilterCodecError::InvalidTag`] for an out-of-range enum code.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader { buf: bytes };
        let version = r.u8("version")?;
        if version != FILTER_CODEC_VERSION {
            return Err(FilterCodecError::VersionMismatch {
                expected: FILTER_CODEC_VERSION,
                found: version,
            });
        }

        let time_range = r.optional("time_range", |r| {
            Ok(TimeRange {
                start: r.time("time_range")?,
                end: r.time("time_range")?,
            })
        })?;
        let design_name = r.optional("design_name", |r| r.i32("design_name"))?;
        let machines = r.optional("machines", |r| {
            Ok(r.guids("machines")?
                .into_iter()
                .map(MachineUid::from_bytes)
                .collect())
        })?;
        let direction = r.optional("direction", |r| direction_from(r.u8("direction")?))?;
        let pass_types = r.optional("pass_types", |r| {
            let bits = r.u8("pass_types")?;
            PassTypeSet::from_bits(bits).ok_or(FilterCodecError::InvalidTag {
                field: "pass_types",
                tag: bits,
            })
        })?;
        let vibration_state =
            r.optional("vibration_state", |r| vibration_from(r.u8("vibration_state")?))?;
        let min_elevation_mapping = r.optional("min_elevation_mapping", |r| {
            mapping_from(r.u8("min_elevation_mapping")?)
        })?;
        let elevation_type =
            r.optional("elevation_type", |r| elevation_type_from(r.u8("elevation_type")?))?;
        let surveyed_surface_exclusions = r.optional("surveyed_surface_exclusions", |r| {
            Ok(r.guids("surveyed_surface_exclusions")?
                .into_iter()
                .map(SurveyedSurfaceUid::from_bytes)
                .collect())
        })?;
        let guidance_mode =
            r.optional("guidance_mode", |r| automatics_from(r.u8("guidance_mode")?))?;
        let gps_accuracy = r.optional("gps_accuracy", |r| {
            Ok(GpsAccuracyFilter {
                accuracy: accuracy_from(r.u8("gps_accuracy")?)?,
                inclusive: r.flag("gps_accuracy")?,
            })
        })?;
        let gps_tolerance = r.optional("gps_tolerance", |r| {
            Ok(GpsToleranceFilter {
                tolerance_mm: r.u16("gps_tolerance")?,
                greater_than: r.flag("gps_tolerance")?,
            })
        })?;
        let positioning_tech =
            r.optional("positioning_tech", |r| positioning_from(r.u8("positioning_tech")?))?;
        let elevation_range = r.optional("elevation_range", |r| match r.u8("elevation_range")? {
            0 => Ok(ElevationRange::Level {
                level: r.f64("elevation_range")?,
                offset: r.f64("elevation_range")?,
                thickness: r.f64("elevation_range")?,
            }),
            1 => Ok(ElevationRange::Design {
                design: DesignRef {
                    design: DesignUid::from_bytes(r.guid("elevation_range")?),
                    offset: r.f64("elevation_range")?,
                },
                offset: r.f64("elevation_range")?,
                thickness: r.f64("elevation_range")?,
            }),
            tag => Err(FilterCodecError::InvalidTag {
                field: "elevation_range",
                tag,
            }),
        })?;
        let layer_state = r.optional("layer_state", |r| layer_state_from(r.u8("layer_state")?))?;
        let compaction_machines_only = r.flag("compaction_machines_only")?;
        let layer_id = r.optional("layer_id", |r| r.u16("layer_id"))?;
        let temperature_range = r.optional("temperature_range", |r| {
            Ok(TemperatureRange {
                min: r.u16("temperature_range")?,
                max: r.u16("temperature_range")?,
            })
        })?;
        let pass_count_range = r.optional("pass_count_range", |r| {
            Ok(PassCountRange {
                min: r.u16("pass_count_range")?,
                max: r.u16("pass_count_range")?,
            })
        })?;
        let return_earliest = r.flag("return_earliest")?;

        Ok(Self {
            time_range,
            design_name,
            machines,
            direction,
            pass_types,
            vibration_state,
            min_elevation_mapping,
            elevation_type,
            surveyed_surface_exclusions,
            guidance_mode,
            gps_accuracy,
            gps_tolerance,
            positioning_tech,
            elevation_range,
            layer_state,
            compaction_machines_only,
            layer_id,
            temperature_range,
            pass_count_range,
            return_earliest,
        })
    }
}

fn put_code(w: &mut Writer, code: Option<u8>) {
    match code {
        Some(code) => {
            w.buf.put_u8(1);
            w.buf.put_u8(code);
        }
        None => w.buf.put_u8(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn busy_filter() -> CellPassAttributeFilter {
        let mut f = CellPassAttributeFilter::new();
        f.set_time_range(TimeRange {
            start: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            end: Utc.timestamp_opt(1_700_003_600, 0).unwrap(),
        });
        f.set_machines(vec![MachineUid::generate(), MachineUid::generate()]);
        f.set_pass_types(PassTypeSet::FRONT | PassTypeSet::TRACK);
        f.set_gps_accuracy(GpsAccuracyFilter {
            accuracy: GpsAccuracy::Medium,
            inclusive: true,
        });
        f.set_elevation_range(ElevationRange::Design {
            design: DesignRef {
                design: DesignUid::generate(),
                offset: 0.25,
            },
            offset: -0.1,
            thickness: 0.3,
        });
        f.set_compaction_machines_only();
        f.set_pass_count_range(PassCountRange { min: 2, max: 4 });
        f.set_return_earliest(true);
        f
    }

    #[test]
    fn test_decoded_filter_matches_original() {
        let filter = busy_filter();
        let decoded = CellPassAttributeFilter::from_bytes(&filter.to_bytes()).unwrap();
        assert_eq!(decoded, filter);
        assert_eq!(decoded.to_bytes(), filter.to_bytes());
    }

    #[test]
    fn test_cleared_filter_is_all_absent() {
        let bytes = CellPassAttributeFilter::new().to_bytes();
        assert_eq!(bytes[0], FILTER_CODEC_VERSION);
        assert!(bytes[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_version_mismatch() {
        let mut bytes = CellPassAttributeFilter::new().to_bytes().to_vec();
        bytes[0] = 7;
        assert_eq!(
            CellPassAttributeFilter::from_bytes(&bytes),
            Err(FilterCodecError::VersionMismatch {
                expected: FILTER_CODEC_VERSION,
                found: 7
            })
        );
    }

    #[test]
    fn test_truncated_input() {
        let bytes = busy_filter().to_bytes();
        let err = CellPassAttributeFilter::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert_eq!(
            err,
            FilterCodecError::Truncated {
                field: "return_earliest"
            }
        );
    }

    #[test]
    fn test_invalid_enum_code() {
        let mut filter = CellPassAttributeFilter::new();
        filter.set_layer_state(LayerState::Off);
        let mut bytes = filter.to_bytes().to_vec();
        // version + 14 absent predicates, then layer state presence and code
        let code_at = 1 + 14 + 1;
        assert_eq!(bytes[code_at], 1);
        bytes[code_at] = 9;
        assert_eq!(
            CellPassAttributeFilter::from_bytes(&bytes),
            Err(FilterCodecError::InvalidTag {
                field: "layer_state",
                tag: 9
            })
        );
    }
}
