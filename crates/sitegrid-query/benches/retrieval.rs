//! Benchmarks for tile retrieval.
//!
//! Compares the latest-value shortcut with full stack scans over a fully
//! populated tile, and measures pass-count filtering on deep stacks.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use sitegrid_query::filter::PassCountRange;
use sitegrid_query::{
    CellPassAttributeFilter, ClientLeafSubGrid, GridDataType, RetrievalRequest, SubGridRetriever,
};
use sitegrid_store::machine::MachineType;
use sitegrid_store::{CellAddress, SUB_GRID_TREE_DIMENSION, SiteModel, SubGridKey};
use sitegrid_test_utils::{add_machine, empty_site_model, pass, seed_passes};

fn populated_model(depth: i64) -> SiteModel {
    let model = empty_site_model();
    let m = add_machine(&model, "roller", MachineType::SoilCompactor);
    let mut passes = Vec::new();
    for x in 0..SUB_GRID_TREE_DIMENSION {
        for y in 0..SUB_GRID_TREE_DIMENSION {
            for t in 0..depth {
                passes.push((CellAddress::new(x, y), pass(t, t as f32 * 0.01, m)));
            }
        }
    }
    seed_passes(&model, passes);
    model
}

fn bench_shortcut_vs_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("height_tile");
    for depth in [1_i64, 16, 64] {
        let model = populated_model(depth);
        let request = RetrievalRequest::new(GridDataType::Height, CellPassAttributeFilter::new());

        let fast = SubGridRetriever::new(&model, request.clone(), None);
        group.bench_with_input(BenchmarkId::new("shortcut", depth), &depth, |b, _| {
            let mut tile =
                ClientLeafSubGrid::new(GridDataType::Height, SubGridKey::containing(0, 0));
            b.iter(|| black_box(fast.retrieve(&mut tile, None).expect("retrieve")));
        });

        let slow = SubGridRetriever::new(&model, request, None).without_shortcut();
        group.bench_with_input(BenchmarkId::new("scan", depth), &depth, |b, _| {
            let mut tile =
                ClientLeafSubGrid::new(GridDataType::Height, SubGridKey::containing(0, 0));
            b.iter(|| black_box(slow.retrieve(&mut tile, None).expect("retrieve")));
        });
    }
    group.finish();
}

fn bench_pass_count_range(c: &mut Criterion) {
    let model = populated_model(64);
    let mut filter = CellPassAttributeFilter::new();
    filter.set_pass_count_range(PassCountRange { min: 10, max: 20 });
    let retriever = SubGridRetriever::new(
        &model,
        RetrievalRequest::new(GridDataType::PassCount, filter),
        None,
    );
    c.bench_function("pass_count_range_64_deep", |b| {
        let mut tile =
            ClientLeafSubGrid::new(GridDataType::PassCount, SubGridKey::containing(0, 0));
        b.iter(|| black_box(retriever.retrieve(&mut tile, None).expect("retrieve")));
    });
}

criterion_group!(benches, bench_shortcut_vs_scan, bench_pass_count_range);
criterion_main!(benches);
