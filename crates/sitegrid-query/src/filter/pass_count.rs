//! Pass-count-range selection over a cell's accepted passes.
//!
//! Ordinals are counted from the oldest accepted pass in half-pass units:
//! a full pass adds two, a half pass adds one, and a pass's ordinal is the
//! number of full passes started so far. Two half passes therefore share
//! one ordinal.

use std::ops::Range;

use super::{FilteredPassData, PassCountRange};

/// Accepted passes of one cell, oldest first, bounded by the number of
/// passes a request may examine.
#[derive(Debug, Clone)]
pub struct PassCountBuffer {
    passes: Vec<FilteredPassData>,
    limit: usize,
}

/// Outcome of a pass-count-range selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PassCountSelection {
    /// Buffer positions whose ordinal fell inside the range.
    pub accepted: (usize, usize),
    /// Full passes inside the accepted range, half passes rounded up.
    pub accepted_count: u16,
    /// Buffer position of the selected pass.
    pub selected: usize,
}

impl PassCountSelection {
    /// The accepted positions as a range.
    #[must_use]
    pub const fn accepted_range(&self) -> Range<usize> {
        self.accepted.0..self.accepted.1
    }
}

const fn units(data: &FilteredPassData) -> u32 {
    if data.pass.half_pass { 1 } else { 2 }
}

/// Full passes represented by a run of passes, half passes rounded up.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn full_pass_count(passes: &[FilteredPassData]) -> u16 {
    let total: u32 = passes.iter().map(units).sum();
    total.div_ceil(2).min(u32::from(u16::MAX)) as u16
}

impl PassCountBuffer {
    /// Creates an empty buffer holding at most `limit` passes.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            passes: Vec::with_capacity(limit.min(16)),
            limit,
        }
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.passes.clear();
    }

    /// Appends the next-newer accepted pass. Returns false, without storing,
    /// once the buffer is full.
    pub fn push(&mut self, data: FilteredPassData) -> bool {
        if self.passes.len() >= self.limit {
            return false;
        }
        if self.passes.len() == self.passes.capacity() {
            let grow = self.passes.len().max(1).min(self.limit - self.passes.len());
            self.passes.reserve_exact(grow);
        }
        self.passes.push(data);
        true
    }

    /// Buffered passes, oldest first.
    #[must_use]
    pub fn passes(&self) -> &[FilteredPassData] {
        &self.passes
    }

    /// Number of buffered passes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// True if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Applies `range` and picks one pass.
    ///
    /// Among the accepted passes, the lowest one recorded while its machine
    /// mapped minimum elevations wins; otherwise the newest wins, or the
    /// oldest when `earliest` is set. Returns `None` if no ordinal falls in
    /// the range.
    #[must_use]
    pub fn select(&self, range: PassCountRange, earliest: bool) -> Option<PassCountSelection> {
        let mut units_so_far = 0_u32;
        let mut first = None;
        let mut end = 0;
        for (i, data) in self.passes.iter().enumerate() {
            units_so_far += units(data);
            let ordinal = units_so_far.div_ceil(2);
            if ordinal > u32::from(range.max) {
                break;
            }
            if ordinal >= u32::from(range.min) {
                first.get_or_insert(i);
                end = i + 1;
            }
        }
        let start = first?;
        let accepted = &self.passes[start..end];

        let lowest_min_elevation = accepted
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_min_elevation_mapping())
            .min_by(|(_, a), (_, b)| a.pass.height.total_cmp(&b.pass.height))
            .map(|(i, _)| start + i);
        let selected = lowest_min_elevation.unwrap_or(if earliest { start } else { end - 1 });

        Some(PassCountSelection {
            accepted: (start, end),
            accepted_count: full_pass_count(accepted),
            selected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sitegrid_store::CellPass;
    use sitegrid_store::events::ElevationMappingMode;

    fn pass(secs: i64, height: f32, half: bool) -> FilteredPassData {
        let t = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
        FilteredPassData::without_events(CellPass::new(t, height, 0).with_half_pass(half))
    }

    fn buffer(passes: impl IntoIterator<Item = FilteredPassData>) -> PassCountBuffer {
        let mut buf = PassCountBuffer::new(1000);
        for p in passes {
            assert!(buf.push(p));
        }
        buf
    }

    #[test]
    fn test_half_pair_counts_as_one_pass() {
        let buf = buffer([
            pass(0, 1.0, false),
            pass(1, 1.1, true),
            pass(2, 1.2, true),
            pass(3, 1.3, false),
        ]);
        let sel = buf.select(PassCountRange { min: 1, max: 2 }, false).unwrap();
        assert_eq!(sel.accepted_range(), 0..3);
        assert_eq!(sel.accepted_count, 2);
        assert_eq!(sel.selected, 2);

        let earliest = buf.select(PassCountRange { min: 1, max: 2 }, true).unwrap();
        assert_eq!(earliest.selected, 0);
    }

    #[test]
    fn test_range_beyond_stack_selects_nothing() {
        let buf = buffer([pass(0, 1.0, false)]);
        assert!(buf.select(PassCountRange { min: 2, max: 3 }, false).is_none());
    }

    #[test]
    fn test_minimum_elevation_machine_wins_tie_break() {
        let mut low = pass(1, 0.5, false);
        low.events.elevation_mapping = Some(ElevationMappingMode::MinimumElevation);
        let buf = buffer([pass(0, 1.0, false), low, pass(2, 1.5, false)]);
        let sel = buf.select(PassCountRange { min: 1, max: 3 }, false).unwrap();
        assert_eq!(sel.selected, 1);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut buf = PassCountBuffer::new(2);
        assert!(buf.push(pass(0, 1.0, false)));
        assert!(buf.push(pass(1, 1.0, false)));
        assert!(!buf.push(pass(2, 1.0, false)));
        assert_eq!(buf.len(), 2);
        buf.clear();
        assert!(buf.is_empty());
    }
}
