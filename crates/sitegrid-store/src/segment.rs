//! Time-bounded segments of a leaf tile's pass stacks.
//!
//! A segment covers the half-open time range `[start, end)` and holds, per
//! cell, the passes recorded in that range in time order. A leaf tile's
//! segments partition time without gaps, so the concatenation of one cell's
//! stacks across segments is the cell's full stack.

use serde::{Deserialize, Serialize};
use sitegrid_core::{SegmentVersion, storage_keys::SegmentKey};

use crate::address::CELLS_PER_SUB_GRID;
use crate::cell_pass::{CellPass, merge_into_stack};

/// Start bound of the first segment of every tile.
pub const START_OF_TIME: i64 = i64::MIN;

/// End bound of the last segment of every tile.
pub const END_OF_TIME: i64 = i64::MAX;

/// Directory entry describing one persisted segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// Inclusive start of the covered time range, in microseconds.
    pub start_micros: i64,
    /// Exclusive end of the covered time range, in microseconds.
    pub end_micros: i64,
    /// Version that produced `key`.
    pub version: SegmentVersion,
    /// Key of the segment bytes.
    pub key: SegmentKey,
    /// Number of passes stored.
    pub pass_count: usize,
    /// `sha256:<hex>` checksum of the segment bytes.
    pub checksum: String,
}

/// One segment with its cell-pass stacks loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    start_micros: i64,
    end_micros: i64,
    cells: Vec<Vec<CellPass>>,
    persisted: Option<SegmentInfo>,
    dirty: bool,
}

impl Segment {
    /// Creates an empty segment covering `[start_micros, end_micros)`.
    #[must_use]
    pub fn new(start_micros: i64, end_micros: i64) -> Self {
        Self {
            start_micros,
            end_micros,
            cells: vec![Vec::new(); CELLS_PER_SUB_GRID],
            persisted: None,
            dirty: false,
        }
    }

    /// Creates an empty segment covering all time.
    #[must_use]
    pub fn all_time() -> Self {
        Self::new(START_OF_TIME, END_OF_TIME)
    }

    /// Rebuilds a segment from decoded stacks and its directory entry.
    #[must_use]
    pub fn from_persisted(cells: Vec<Vec<CellPass>>, info: SegmentInfo) -> Self {
        Self {
            start_micros: info.start_micros,
            end_micros: info.end_micros,
            cells,
            persisted: Some(info),
            dirty: false,
        }
    }

    /// Inclusive start of the covered range.
    #[must_use]
    pub const fn start_micros(&self) -> i64 {
        self.start_micros
    }

    /// Exclusive end of the covered range.
    #[must_use]
    pub const fn end_micros(&self) -> i64 {
        self.end_micros
    }

    /// True if a pass at `micros` belongs to this segment.
    #[must_use]
    pub const fn covers(&self, micros: i64) -> bool {
        micros >= self.start_micros && (micros < self.end_micros || self.end_micros == END_OF_TIME)
    }

    /// The stack of cell `index`, oldest first.
    #[must_use]
    pub fn passes(&self, index: usize) -> &[CellPass] {
        &self.cells[index]
    }

    /// All stacks, indexed by cell.
    #[must_use]
    pub fn stacks(&self) -> &[Vec<CellPass>] {
        &self.cells
    }

    /// Total passes held.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.cells.iter().map(Vec::len).sum()
    }

    /// The directory entry of the last persisted version, if any.
    #[must_use]
    pub const fn persisted(&self) -> Option<&SegmentInfo> {
        self.persisted.as_ref()
    }

    /// True if the in-memory content differs from the persisted version.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Merges passes into cell `index`. Returns the number of new passes.
    ///
    /// The segment becomes dirty only if the stack content changed.
    pub fn merge_cell(&mut self, index: usize, incoming: &[CellPass]) -> usize {
        let merge = merge_into_stack(&mut self.cells[index], incoming);
        if merge.changed() {
            self.dirty = true;
        }
        merge.added
    }

    /// Records that the current content was persisted as `info`.
    ///
    /// Returns the directory entry this version replaces.
    pub fn mark_persisted(&mut self, info: SegmentInfo) -> Option<SegmentInfo> {
        self.dirty = false;
        self.persisted.replace(info)
    }

    /// Builds the key for persisting the current content as `version`.
    #[must_use]
    pub fn key_for(
        &self,
        site_model: sitegrid_core::SiteModelId,
        origin_x: u32,
        origin_y: u32,
        version: SegmentVersion,
    ) -> SegmentKey {
        SegmentKey::new(
            site_model,
            origin_x,
            origin_y,
            self.start_micros,
            self.end_micros,
            version,
        )
    }

    /// Splits the segment at the median pass time.
    ///
    /// Returns `None` when no split point separates the passes (every pass
    /// shares one timestamp). Both halves are dirty and unpersisted.
    #[must_use]
    pub fn cleave(&self) -> Option<(Self, Self)> {
        let mut times: Vec<i64> = self
            .cells
            .iter()
            .flat_map(|stack| stack.iter().map(CellPass::time_micros))
            .collect();
        if times.len() < 2 {
            return None;
        }
        times.sort_unstable();
        let median = times[times.len() / 2];
        if median <= times[0] {
            return None;
        }

        let mut left = Self::new(self.start_micros, median);
        let mut right = Self::new(median, self.end_micros);
        for (index, stack) in self.cells.iter().enumerate() {
            let split = stack.partition_point(|p| p.time_micros() < median);
            left.cells[index] = stack[..split].to_vec();
            right.cells[index] = stack[split..].to_vec();
        }
        left.dirty = true;
        right.dirty = true;
        Some((left, right))
    }
}
