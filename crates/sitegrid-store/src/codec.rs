//! Binary segment codec and JSON leaf directories.
//!
//! # Segment layout
//!
//! ```text
//! magic "SGSG" | version u8 | origin_x u32 | origin_y u32
//! start_us i64 | end_us i64 | populated_cells u16
//! repeated: cell_index u16 | pass_count u32 | passes...
//! ```
//!
//! Each pass is `time_us i64 | height f32 | machine u16 | pass_type u8 |
//! flags u16` followed by the optional attributes whose flag bit is set, in
//! flag order. All integers are little endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address::{CELLS_PER_SUB_GRID, SubGridKey};
use crate::cell_pass::{CellPass, GpsMode, PassType};
use crate::error::{Result, StoreError};
use crate::latest::LatestCell;
use crate::segment::{Segment, SegmentInfo};

const MAGIC: &[u8; 4] = b"SGSG";

/// Current segment format version.
pub const SEGMENT_FORMAT_VERSION: u8 = 1;

const HALF_PASS: u16 = 1;
const HAS_CCV: u16 = 1 << 1;
const HAS_MDP: u16 = 1 << 2;
const HAS_CCA: u16 = 1 << 3;
const HAS_TEMPERATURE: u16 = 1 << 4;
const HAS_FREQUENCY: u16 = 1 << 5;
const HAS_AMPLITUDE: u16 = 1 << 6;
const HAS_SPEED: u16 = 1 << 7;
const HAS_GPS_MODE: u16 = 1 << 8;
const HAS_RMV: u16 = 1 << 9;
const HAS_LATENCY: u16 = 1 << 10;

/// Computes the `sha256:<hex>` checksum recorded for segment bytes.
#[must_use]
pub fn checksum(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Encodes a segment of the tile at `origin`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode_segment(origin: SubGridKey, segment: &Segment) -> Bytes {
    let populated = segment.stacks().iter().filter(|s| !s.is_empty()).count();
    let mut buf = BytesMut::with_capacity(32 + segment.pass_count() * 24);
    buf.put_slice(MAGIC);
    buf.put_u8(SEGMENT_FORMAT_VERSION);
    buf.put_u32_le(origin.origin_x);
    buf.put_u32_le(origin.origin_y);
    buf.put_i64_le(segment.start_micros());
    buf.put_i64_le(segment.end_micros());
    buf.put_u16_le(populated as u16);

    for (index, stack) in segment.stacks().iter().enumerate() {
        if stack.is_empty() {
            continue;
        }
        buf.put_u16_le(index as u16);
        buf.put_u32_le(stack.len() as u32);
        for pass in stack {
            put_pass(&mut buf, pass);
        }
    }
    buf.freeze()
}

fn put_pass(buf: &mut BytesMut, pass: &CellPass) {
    let mut flags = 0u16;
    if pass.half_pass {
        flags |= HALF_PASS;
    }
    let optional = [
        (pass.ccv.is_some(), HAS_CCV),
        (pass.mdp.is_some(), HAS_MDP),
        (pass.cca.is_some(), HAS_CCA),
        (pass.material_temperature.is_some(), HAS_TEMPERATURE),
        (pass.frequency.is_some(), HAS_FREQUENCY),
        (pass.amplitude.is_some(), HAS_AMPLITUDE),
        (pass.machine_speed.is_some(), HAS_SPEED),
        (pass.gps_mode.is_some(), HAS_GPS_MODE),
        (pass.rmv.is_some(), HAS_RMV),
        (pass.radio_latency.is_some(), HAS_LATENCY),
    ];
    for (present, bit) in optional {
        if present {
            flags |= bit;
        }
    }

    buf.put_i64_le(pass.time_micros());
    buf.put_f32_le(pass.height);
    buf.put_u16_le(pass.internal_machine_index);
    buf.put_u8(pass.pass_type.code());
    buf.put_u16_le(flags);

    if let Some(v) = pass.ccv {
        buf.put_i16_le(v);
    }
    if let Some(v) = pass.mdp {
        buf.put_i16_le(v);
    }
    if let Some(v) = pass.cca {
        buf.put_u8(v);
    }
    if let Some(v) = pass.material_temperature {
        buf.put_u16_le(v);
    }
    if let Some(v) = pass.frequency {
        buf.put_u16_le(v);
    }
    if let Some(v) = pass.amplitude {
        buf.put_u16_le(v);
    }
    if let Some(v) = pass.machine_speed {
        buf.put_u16_le(v);
    }
    if let Some(v) = pass.gps_mode {
        buf.put_u8(v.code());
    }
    if let Some(v) = pass.rmv {
        buf.put_i16_le(v);
    }
    if let Some(v) = pass.radio_latency {
        buf.put_u8(v);
    }
}

/// A decoded segment body.
#[derive(Debug)]
pub struct DecodedSegment {
    /// Origin of the owning tile.
    pub origin: SubGridKey,
    /// Inclusive start of the covered range.
    pub start_micros: i64,
    /// Exclusive end of the covered range.
    pub end_micros: i64,
    /// Stacks indexed by cell.
    pub cells: Vec<Vec<CellPass>>,
}

fn need(buf: &impl Buf, n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(StoreError::codec(format!(
            "truncated segment reading {what}: need {n} bytes, have {}",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Decodes segment bytes.
///
/// # Errors
///
/// Returns [`StoreError::Codec`] for bad magic, an unknown format version,
/// truncated input or out-of-range codes.
pub fn decode_segment(bytes: &[u8]) -> Result<DecodedSegment> {
    let mut buf = bytes;
    need(&buf, 4 + 1 + 8 + 16 + 2, "header")?;
    let mut magic = [0u8; 4];
    buf.copy_to_slice(&mut magic);
    if &magic != MAGIC {
        return Err(StoreError::codec("bad segment magic"));
    }
    let version = buf.get_u8();
    if version != SEGMENT_FORMAT_VERSION {
        return Err(StoreError::codec(format!(
            "unsupported segment format version {version}"
        )));
    }
    let origin = SubGridKey {
        origin_x: buf.get_u32_le(),
        origin_y: buf.get_u32_le(),
    };
    let start_micros = buf.get_i64_le();
    let end_micros = buf.get_i64_le();
    let populated = buf.get_u16_le();

    let mut cells = vec![Vec::new(); CELLS_PER_SUB_GRID];
    for _ in 0..populated {
        need(&buf, 6, "cell header")?;
        let index = usize::from(buf.get_u16_le());
        if index >= CELLS_PER_SUB_GRID {
            return Err(StoreError::codec(format!("cell index {index} out of range")));
        }
        let count = buf.get_u32_le() as usize;
        let mut stack = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            stack.push(get_pass(&mut buf)?);
        }
        cells[index] = stack;
    }
    if buf.has_remaining() {
        return Err(StoreError::codec("trailing bytes after segment body"));
    }

    Ok(DecodedSegment {
        origin,
        start_micros,
        end_micros,
        cells,
    })
}

fn get_pass(buf: &mut &[u8]) -> Result<CellPass> {
    need(&*buf, 8 + 4 + 2 + 1 + 2, "pass")?;
    let micros = buf.get_i64_le();
    let time = DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::codec(format!("pass time {micros} out of range")))?;
    let height = buf.get_f32_le();
    let machine = buf.get_u16_le();
    let code = buf.get_u8();
    let pass_type = PassType::from_code(code)
        .ok_or_else(|| StoreError::codec(format!("unknown pass type {code}")))?;
    let flags = buf.get_u16_le();

    let mut pass = CellPass::new(time, height, machine)
        .with_pass_type(pass_type)
        .with_half_pass(flags & HALF_PASS != 0);

    if flags & HAS_CCV != 0 {
        need(&*buf, 2, "ccv")?;
        pass.ccv = Some(buf.get_i16_le());
    }
    if flags & HAS_MDP != 0 {
        need(&*buf, 2, "mdp")?;
        pass.mdp = Some(buf.get_i16_le());
    }
    if flags & HAS_CCA != 0 {
        need(&*buf, 1, "cca")?;
        pass.cca = Some(buf.get_u8());
    }
    if flags & HAS_TEMPERATURE != 0 {
        need(&*buf, 2, "temperature")?;
        pass.material_temperature = Some(buf.get_u16_le());
    }
    if flags & HAS_FREQUENCY != 0 {
        need(&*buf, 2, "frequency")?;
        pass.frequency = Some(buf.get_u16_le());
    }
    if flags & HAS_AMPLITUDE != 0 {
        need(&*buf, 2, "amplitude")?;
        pass.amplitude = Some(buf.get_u16_le());
    }
    if flags & HAS_SPEED != 0 {
        need(&*buf, 2, "machine speed")?;
        pass.machine_speed = Some(buf.get_u16_le());
    }
    if flags & HAS_GPS_MODE != 0 {
        need(&*buf, 1, "gps mode")?;
        let code = buf.get_u8();
        pass.gps_mode = Some(
            GpsMode::from_code(code)
                .ok_or_else(|| StoreError::codec(format!("unknown gps mode {code}")))?,
        );
    }
    if flags & HAS_RMV != 0 {
        need(&*buf, 2, "rmv")?;
        pass.rmv = Some(buf.get_i16_le());
    }
    if flags & HAS_LATENCY != 0 {
        need(&*buf, 1, "radio latency")?;
        pass.radio_latency = Some(buf.get_u8());
    }
    Ok(pass)
}

/// One populated entry of the latest-value cache in a directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEntry {
    /// Flattened cell index.
    pub index: u16,
    /// Cached values.
    pub cell: LatestCell,
}

/// Persisted directory of one leaf tile.
///
/// Lists the segments that make up the tile and carries the tile's
/// latest-value cache so a reload need not rescan every stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafDirectory {
    /// Tile origin.
    pub origin: SubGridKey,
    /// Segments in time order.
    pub segments: Vec<SegmentInfo>,
    /// Populated latest-value entries.
    pub latest: Vec<LatestEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_segment() -> Segment {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut seg = Segment::all_time();
        seg.merge_cell(
            66,
            &[
                CellPass::new(t, 10.5, 3)
                    .with_ccv(420)
                    .with_gps_mode(GpsMode::Fixed)
                    .with_half_pass(true),
                CellPass::new(t + chrono::Duration::seconds(5), 10.4, 1)
                    .with_pass_type(PassType::Rear)
                    .with_temperature(1450),
            ],
        );
        seg
    }

    #[test]
    fn test_segment_bytes_decode_to_same_passes() {
        let seg = sample_segment();
        let origin = SubGridKey::containing(64, 96);
        let decoded = decode_segment(&encode_segment(origin, &seg)).expect("decode");

        assert_eq!(decoded.origin, origin);
        assert_eq!(decoded.start_micros, seg.start_micros());
        assert_eq!(decoded.cells[66], seg.passes(66));
        assert!(decoded.cells[0].is_empty());
    }

    #[test]
    fn test_truncated_segment_is_rejected() {
        let bytes = encode_segment(SubGridKey::containing(0, 0), &sample_segment());
        let err = decode_segment(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, StoreError::Codec { .. }));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = encode_segment(SubGridKey::containing(0, 0), &sample_segment()).to_vec();
        bytes[4] = 9;
        let err = decode_segment(&bytes).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn test_checksum_format() {
        let sum = checksum(b"abc");
        assert!(sum.starts_with("sha256:"));
        assert_eq!(sum.len(), "sha256:".len() + 64);
    }
}
