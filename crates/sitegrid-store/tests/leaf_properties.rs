//! Property-based tests for leaf tiles and existence maps.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use sitegrid_store::address::cell_index;
use sitegrid_store::{
    CELLS_PER_SUB_GRID, CellPass, ExistenceMap, LeafSubGrid, MachineIndex, SubGridKey,
};

/// Generates a pass at a small time offset, so collisions are common.
fn arb_pass() -> impl Strategy<Value = CellPass> {
    (0i64..200, 0u16..3, -5.0f32..5.0).prop_map(|(secs, machine, height)| {
        CellPass::new(
            Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            height,
            machine,
        )
    })
}

/// Generates passes for a handful of cells: `(x, y, pass)`.
fn arb_cell_passes() -> impl Strategy<Value = Vec<(u32, u32, CellPass)>> {
    prop::collection::vec((0u32..4, 0u32..4, arb_pass()), 1..120)
}

fn stacks_of(passes: &[(u32, u32, CellPass)]) -> Vec<Vec<CellPass>> {
    let mut stacks = vec![Vec::new(); CELLS_PER_SUB_GRID];
    for (x, y, pass) in passes {
        stacks[cell_index(*x, *y)].push(*pass);
    }
    stacks
}

fn collect(leaf: &LeafSubGrid, x: u32, y: u32) -> Vec<CellPass> {
    leaf.cell_passes(x, y).unwrap().copied().collect()
}

fn arb_leaf_keys() -> impl Strategy<Value = Vec<SubGridKey>> {
    prop::collection::vec((0u32..4096, 0u32..4096), 0..40)
        .prop_map(|cells| cells.into_iter().map(|(x, y)| SubGridKey::containing(x, y)).collect())
}

proptest! {
    /// Merged stacks are time ordered and hold one pass per machine event.
    #[test]
    fn merged_stacks_are_ordered_and_deduplicated(passes in arb_cell_passes()) {
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        leaf.merge_stacks(&stacks_of(&passes));

        for x in 0..4 {
            for y in 0..4 {
                let stack = collect(&leaf, x, y);
                prop_assert!(stack.windows(2).all(|w| w[0].time <= w[1].time));

                let events: BTreeSet<(i64, MachineIndex)> = passes
                    .iter()
                    .filter(|(px, py, _)| *px == x && *py == y)
                    .map(|(_, _, p)| (p.time_micros(), p.internal_machine_index))
                    .collect();
                prop_assert_eq!(stack.len(), events.len());
            }
        }
    }

    /// Merging in two deliveries gives the same stacks as one delivery.
    #[test]
    fn split_delivery_matches_single_delivery(passes in arb_cell_passes(), cut in 0usize..120) {
        let cut = cut.min(passes.len());
        let mut once = LeafSubGrid::new(SubGridKey::containing(0, 0));
        once.merge_stacks(&stacks_of(&passes));

        let mut twice = LeafSubGrid::new(SubGridKey::containing(0, 0));
        twice.merge_stacks(&stacks_of(&passes[..cut]));
        twice.merge_stacks(&stacks_of(&passes[cut..]));

        for x in 0..4 {
            for y in 0..4 {
                let event = |p: &CellPass| (p.time, p.internal_machine_index);
                let a: Vec<_> = collect(&once, x, y).iter().map(event).collect();
                let b: Vec<_> = collect(&twice, x, y).iter().map(event).collect();
                prop_assert_eq!(a, b);
            }
        }
    }

    /// Cleaving never loses, reorders or misplaces passes.
    #[test]
    fn cleaving_preserves_passes(passes in arb_cell_passes(), max in 2usize..20) {
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        leaf.merge_stacks(&stacks_of(&passes));
        let before: Vec<Vec<CellPass>> = (0..16).map(|i| collect(&leaf, i % 4, i / 4)).collect();
        let total = leaf.pass_count();

        leaf.cleave_segments(max);

        prop_assert_eq!(leaf.pass_count(), total);
        let after: Vec<Vec<CellPass>> = (0..16).map(|i| collect(&leaf, i % 4, i / 4)).collect();
        prop_assert_eq!(before, after);
        for segment in leaf.segments() {
            for stack in segment.stacks() {
                for pass in stack {
                    prop_assert!(segment.covers(pass.time_micros()));
                }
            }
        }
        prop_assert!(leaf
            .segments()
            .windows(2)
            .all(|w| w[0].end_micros() == w[1].start_micros()));
    }

    /// The latest-value cache agrees with the newest pass of each stack.
    #[test]
    fn latest_height_is_newest_pass(passes in arb_cell_passes()) {
        let mut leaf = LeafSubGrid::new(SubGridKey::containing(0, 0));
        leaf.merge_stacks(&stacks_of(&passes));
        for x in 0..4 {
            for y in 0..4 {
                let newest = collect(&leaf, x, y).last().map(|p| p.height);
                let cached = leaf.latest_cell(x, y).height.map(|h| h.value);
                prop_assert_eq!(newest, cached);
            }
        }
    }

    /// Difference removes exactly the other map's leaves.
    #[test]
    fn existence_difference_and_union(a in arb_leaf_keys(), b in arb_leaf_keys()) {
        let left: ExistenceMap = a.iter().copied().collect();
        let right: ExistenceMap = b.iter().copied().collect();

        let mut union = left.clone();
        union.union_with(&right);
        let only_left = union.difference(&right);

        for key in &a {
            prop_assert!(union.contains(*key));
            prop_assert_eq!(only_left.contains(*key), !right.contains(*key));
        }
        for key in &b {
            prop_assert!(union.contains(*key));
            prop_assert!(!only_left.contains(*key));
        }
        let distinct: BTreeSet<SubGridKey> = a.iter().chain(&b).copied().collect();
        prop_assert_eq!(union.len(), distinct.len());
    }
}
