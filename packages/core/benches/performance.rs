//! Performance benchmarks for the resolver's critical path
//!
//! Run with: `cargo bench -p typetree-core`
//!
//! Measures:
//! - closure reachability lookups (the resolver's inner loop)
//! - full option resolution against a synthetic multi-branch family

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::runtime::Runtime;
use typetree_core::db::{ClosureIndex, DatabaseService, Reachability, SegmentTreeStore};
use typetree_core::models::SelectionByCode;
use typetree_core::services::{TypecodeImporter, TypecodeRecord, VariantService};

/// Synthetic family: FAN branches x DEPTH levels of refinement
const FAN: usize = 8;
const DEPTH: usize = 4;

fn generate_records() -> Vec<TypecodeRecord> {
    let mut records = Vec::new();
    let mut paths: Vec<String> = vec!["BNCH".to_string()];

    for level in 0..DEPTH {
        let mut next = Vec::with_capacity(paths.len() * FAN);
        for path in &paths {
            for branch in 0..FAN {
                next.push(format!("{}-S{}{:02}", path, level, branch));
            }
        }
        records.extend(next.iter().map(|p| TypecodeRecord::new(p.clone())));
        paths = next;
    }

    records
}

async fn setup_engine() -> (VariantService, Arc<ClosureIndex>, i64, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(
        DatabaseService::new(temp_dir.path().join("bench.db"))
            .await
            .unwrap(),
    );
    let store = Arc::new(SegmentTreeStore::new(db.clone()));

    let importer = TypecodeImporter::new(store.clone());
    importer.import(&generate_records()).await.unwrap();

    let family_id = store.family_by_code("BNCH").await.unwrap().unwrap().id;
    let reach = Arc::new(ClosureIndex::new(db));
    let service = VariantService::new(store, reach.clone());

    (service, reach, family_id, temp_dir)
}

fn bench_reachability_lookup(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (_service, reach, family_id, _temp) = rt.block_on(setup_engine());

    c.bench_function("closure_is_reachable", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for i in 0..iters {
                    let hit = reach
                        .is_reachable(family_id, family_id + 1 + (i as i64 % 100))
                        .await
                        .unwrap();
                    black_box(hit);
                }
                start.elapsed()
            })
        })
    });
}

fn bench_resolve_options(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (service, _reach, family_id, _temp) = rt.block_on(setup_engine());

    // A gapped selection forcing both forward and backward checks
    let selections = vec![
        SelectionByCode::new(1, "S000"),
        SelectionByCode::new(3, "S200"),
    ];

    c.bench_function("resolve_options_gapped", |b| {
        b.iter_custom(|iters| {
            rt.block_on(async {
                let start = Instant::now();
                for _ in 0..iters {
                    let results = service
                        .resolve_options(family_id, 2, black_box(&selections))
                        .await
                        .unwrap();
                    black_box(results);
                }
                start.elapsed()
            })
        })
    });
}

criterion_group!(benches, bench_reachability_lookup, bench_resolve_options);
criterion_main!(benches);
