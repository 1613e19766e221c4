//! Leaf tiles: segments plus the latest-value cache.
//!
//! A leaf tile is mutated only on a private copy during ingest (see
//! `SpatialStore::publish`); readers always hold an immutable snapshot.

use std::collections::BTreeSet;

use bytes::Bytes;
use sitegrid_core::storage_keys::{DirectoryKey, SegmentKey};
use sitegrid_core::{SegmentVersion, SiteModelId, json_bytes};

use crate::address::{CELLS_PER_SUB_GRID, SubGridKey, cell_index};
use crate::bitmask::SubGridBitmask;
use crate::cell_pass::CellPass;
use crate::codec::{LatestEntry, LeafDirectory, checksum, encode_segment};
use crate::error::{Result, StoreError};
use crate::latest::{LatestCell, LatestCells, PassAttribute};
use crate::segment::{Segment, SegmentInfo};

/// Outcome of merging passes into a leaf.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafMergeOutcome {
    /// Passes that were new to the leaf.
    pub passes_added: usize,
    /// Cells that received at least one pass.
    pub cells_touched: usize,
}

/// Everything one leaf needs written to persist its dirty state.
#[derive(Debug, Clone)]
pub struct LeafCommit {
    /// Tile origin.
    pub origin: SubGridKey,
    /// New segment versions to write before the directory.
    pub segment_writes: Vec<(SegmentKey, Bytes)>,
    /// Directory key.
    pub directory_key: DirectoryKey,
    /// Serialized directory referencing the new segment versions.
    pub directory: Bytes,
    /// Keys of segment versions this commit supersedes.
    pub retired: Vec<SegmentKey>,
}

/// One 32x32 leaf tile.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafSubGrid {
    key: SubGridKey,
    segments: Vec<Segment>,
    latest: LatestCells,
    superseded: Vec<SegmentKey>,
}

impl LeafSubGrid {
    /// Creates a leaf with a single empty segment covering all time.
    #[must_use]
    pub fn new(key: SubGridKey) -> Self {
        Self {
            key,
            segments: vec![Segment::all_time()],
            latest: LatestCells::default(),
            superseded: Vec::new(),
        }
    }

    /// Creates a leaf that owns no cell storage.
    ///
    /// Reading passes from such a leaf fails with
    /// [`StoreError::MissingCellStorage`].
    #[must_use]
    pub fn unallocated(key: SubGridKey) -> Self {
        Self {
            key,
            segments: Vec::new(),
            latest: LatestCells::default(),
            superseded: Vec::new(),
        }
    }

    /// Tile origin.
    #[must_use]
    pub const fn key(&self) -> SubGridKey {
        self.key
    }

    /// True if the leaf owns cell storage.
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        !self.segments.is_empty()
    }

    /// Segments in time order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The latest-value cache.
    #[must_use]
    pub const fn latest(&self) -> &LatestCells {
        &self.latest
    }

    /// Latest values of local cell `(x, y)`.
    #[must_use]
    pub fn latest_cell(&self, x: u32, y: u32) -> &LatestCell {
        self.latest.get(cell_index(x, y))
    }

    /// Mask of cells holding a value of `attribute`.
    #[must_use]
    pub fn attribute_existence(&self, attribute: PassAttribute) -> SubGridBitmask {
        self.latest.attribute_existence(attribute)
    }

    /// The full pass stack of local cell `(x, y)`, oldest first.
    ///
    /// The iterator is double ended; reverse it for newest-first walks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingCellStorage`] if the leaf owns no
    /// segments.
    pub fn cell_passes(
        &self,
        x: u32,
        y: u32,
    ) -> Result<impl DoubleEndedIterator<Item = &CellPass> + '_> {
        if !self.is_allocated() {
            return Err(StoreError::MissingCellStorage { origin: self.key });
        }
        let index = cell_index(x, y);
        Ok(self.segments.iter().flat_map(move |s| s.passes(index).iter()))
    }

    /// Number of passes stored for local cell `(x, y)`.
    #[must_use]
    pub fn cell_pass_count(&self, x: u32, y: u32) -> usize {
        let index = cell_index(x, y);
        self.segments.iter().map(|s| s.passes(index).len()).sum()
    }

    /// Total passes stored.
    #[must_use]
    pub fn pass_count(&self) -> usize {
        self.segments.iter().map(Segment::pass_count).sum()
    }

    /// True if any segment differs from its persisted version.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.segments.iter().any(Segment::is_dirty) || !self.superseded.is_empty()
    }

    /// Merges incoming stacks (indexed by cell) into the leaf.
    ///
    /// Each pass is routed to the segment covering its time; the cache of
    /// every touched cell is recomputed from its merged stack.
    pub fn merge_stacks(&mut self, stacks: &[Vec<CellPass>]) -> LeafMergeOutcome {
        if !self.is_allocated() {
            self.segments.push(Segment::all_time());
        }
        let mut outcome = LeafMergeOutcome::default();
        for (index, incoming) in stacks.iter().enumerate().take(CELLS_PER_SUB_GRID) {
            if incoming.is_empty() {
                continue;
            }
            outcome.cells_touched += 1;
            for segment in &mut self.segments {
                let routed: Vec<CellPass> = incoming
                    .iter()
                    .filter(|p| segment.covers(p.time_micros()))
                    .copied()
                    .collect();
                outcome.passes_added += segment.merge_cell(index, &routed);
            }
            self.refresh_latest(index);
        }
        outcome
    }

    fn refresh_latest(&mut self, index: usize) {
        let cell = LatestCell::from_newest_first(
            self.segments
                .iter()
                .rev()
                .flat_map(|s| s.passes(index).iter().rev()),
        );
        self.latest.set(index, cell);
    }

    /// Splits segments holding more than `max_passes` passes.
    ///
    /// Returns the number of splits performed.
    pub fn cleave_segments(&mut self, max_passes: usize) -> usize {
        let mut splits = 0;
        let mut i = 0;
        while i < self.segments.len() {
            if self.segments[i].pass_count() > max_passes {
                if let Some((left, right)) = self.segments[i].cleave() {
                    let old = std::mem::replace(&mut self.segments[i], left);
                    self.segments.insert(i + 1, right);
                    if let Some(info) = old.persisted() {
                        self.superseded.push(info.key.clone());
                    }
                    splits += 1;
                    continue;
                }
            }
            i += 1;
        }
        splits
    }

    /// Versions every dirty segment and serializes the new directory.
    ///
    /// After this call the leaf describes the state the returned writes
    /// produce; the caller must commit segment writes before the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be serialized.
    pub fn prepare_commit(&mut self, site_model: SiteModelId) -> Result<LeafCommit> {
        let mut segment_writes = Vec::new();
        let mut retired = std::mem::take(&mut self.superseded);

        for segment in &mut self.segments {
            if !segment.is_dirty() {
                continue;
            }
            let version = SegmentVersion::generate();
            let key = segment.key_for(site_model, self.key.origin_x, self.key.origin_y, version);
            let bytes = encode_segment(self.key, segment);
            let info = SegmentInfo {
                start_micros: segment.start_micros(),
                end_micros: segment.end_micros(),
                version,
                key: key.clone(),
                pass_count: segment.pass_count(),
                checksum: checksum(&bytes),
            };
            if let Some(previous) = segment.mark_persisted(info) {
                retired.push(previous.key);
            }
            segment_writes.push((key, bytes));
        }

        let directory = json_bytes(&self.directory())?;
        Ok(LeafCommit {
            origin: self.key,
            segment_writes,
            directory_key: DirectoryKey::new(site_model, self.key.origin_x, self.key.origin_y),
            directory,
            retired,
        })
    }

    /// The directory describing the persisted segments of this leaf.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn directory(&self) -> LeafDirectory {
        LeafDirectory {
            origin: self.key,
            segments: self
                .segments
                .iter()
                .filter_map(|s| s.persisted().cloned())
                .collect(),
            latest: self
                .latest
                .iter_populated()
                .map(|(index, cell)| LatestEntry {
                    index: index as u16,
                    cell: cell.clone(),
                })
                .collect(),
        }
    }

    /// Rebuilds a leaf from its directory and decoded segments.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Inconsistent`] if the segments do not match the
    /// directory or leave gaps in time.
    pub fn from_persisted(directory: LeafDirectory, segments: Vec<Segment>) -> Result<Self> {
        if segments.len() != directory.segments.len() {
            return Err(StoreError::inconsistent(format!(
                "directory of ({}, {}) lists {} segments, {} loaded",
                directory.origin.origin_x,
                directory.origin.origin_y,
                directory.segments.len(),
                segments.len()
            )));
        }
        let keys: BTreeSet<_> = directory.segments.iter().map(|s| &s.key).collect();
        if segments
            .iter()
            .any(|s| s.persisted().is_none_or(|info| !keys.contains(&info.key)))
        {
            return Err(StoreError::inconsistent(format!(
                "segment of ({}, {}) not listed in its directory",
                directory.origin.origin_x, directory.origin.origin_y
            )));
        }
        if let Some(pair) = segments
            .windows(2)
            .find(|pair| pair[0].end_micros() != pair[1].start_micros())
        {
            return Err(StoreError::inconsistent(format!(
                "segments of ({}, {}) leave a gap at {}",
                directory.origin.origin_x,
                directory.origin.origin_y,
                pair[0].end_micros()
            )));
        }

        let mut latest = LatestCells::default();
        for entry in directory.latest {
            let index = usize::from(entry.index);
            if index < CELLS_PER_SUB_GRID {
                latest.set(index, entry.cell);
            }
        }
        Ok(Self {
            key: directory.origin,
            segments,
            latest,
            superseded: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn stacks_with(x: u32, y: u32, passes: Vec<CellPass>) -> Vec<Vec<CellPass>> {
        let mut stacks = vec![Vec::new(); CELLS_PER_SUB_GRID];
        stacks[cell_index(x, y)] = passes;
        stacks
    }

    #[test]
    fn test_merge_refreshes_latest() {
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        leaf.merge_stacks(&stacks_with(2, 2, vec![CellPass::new(at(1), 5.0, 0)]));
        let outcome =
            leaf.merge_stacks(&stacks_with(2, 2, vec![CellPass::new(at(2), 6.0, 1).with_ccv(10)]));

        assert_eq!(outcome.passes_added, 1);
        assert_eq!(outcome.cells_touched, 1);
        let latest = leaf.latest_cell(2, 2);
        assert_eq!(latest.height.unwrap().value, 6.0);
        assert_eq!(latest.ccv.unwrap().value, 10);
        assert!(leaf.attribute_existence(PassAttribute::Ccv).get(2, 2));
        assert_eq!(leaf.cell_passes(2, 2).unwrap().rev().next().unwrap().height, 6.0);
    }

    #[test]
    fn test_unallocated_leaf_reports_missing_storage() {
        let leaf = LeafSubGrid::unallocated(SubGridKey::containing(32, 64));
        let err = leaf.cell_passes(0, 0).err().unwrap();
        assert!(matches!(err, StoreError::MissingCellStorage { origin } if origin.origin_x == 32));
    }

    #[test]
    fn test_prepare_commit_retires_previous_version() {
        let site = SiteModelId::generate();
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        leaf.merge_stacks(&stacks_with(0, 0, vec![CellPass::new(at(1), 1.0, 0)]));

        let first = leaf.prepare_commit(site).unwrap();
        assert_eq!(first.segment_writes.len(), 1);
        assert!(first.retired.is_empty());
        assert!(!leaf.is_dirty());

        leaf.merge_stacks(&stacks_with(0, 0, vec![CellPass::new(at(2), 2.0, 0)]));
        let second = leaf.prepare_commit(site).unwrap();
        assert_eq!(second.retired, vec![first.segment_writes[0].0.clone()]);
        assert_ne!(second.segment_writes[0].0, first.segment_writes[0].0);
    }

    #[test]
    fn test_identical_redelivery_writes_no_segments() {
        let site = SiteModelId::generate();
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        let passes = vec![CellPass::new(at(1), 1.0, 0), CellPass::new(at(2), 1.2, 0)];
        leaf.merge_stacks(&stacks_with(3, 4, passes.clone()));
        leaf.prepare_commit(site).unwrap();

        let outcome = leaf.merge_stacks(&stacks_with(3, 4, passes));
        assert_eq!(outcome.passes_added, 0);
        assert!(!leaf.is_dirty());

        let commit = leaf.prepare_commit(site).unwrap();
        assert!(commit.segment_writes.is_empty());
        assert!(commit.retired.is_empty());
    }

    #[test]
    fn test_cleave_keeps_stack_order_across_segments() {
        let site = SiteModelId::generate();
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        let passes: Vec<CellPass> = (0..10).map(|i| CellPass::new(at(i), i as f32, 0)).collect();
        leaf.merge_stacks(&stacks_with(1, 1, passes));
        leaf.prepare_commit(site).unwrap();

        assert!(leaf.cleave_segments(4) >= 2);
        assert!(leaf.segments().iter().all(|s| s.pass_count() <= 4));
        let heights: Vec<f32> = leaf.cell_passes(1, 1).unwrap().map(|p| p.height).collect();
        assert_eq!(heights, (0..10).map(|i| i as f32).collect::<Vec<_>>());

        let commit = leaf.prepare_commit(site).unwrap();
        assert_eq!(commit.retired.len(), 1);
        assert_eq!(commit.segment_writes.len(), leaf.segments().len());
    }
}
