//! Benchmarks for grid generation and adjacency construction.

use birdmap_grid::{build_adjacency, generate_grid, CellSize, Extent, TouchPolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use geo::{coord, MultiPolygon, Rect};

fn boundary(side: f64) -> MultiPolygon<f64> {
    let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: side, y: side });
    MultiPolygon::new(vec![rect.to_polygon()])
}

fn bench_adjacency(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_adjacency");
    for side in [10usize, 20, 40] {
        let s = side as f64;
        let grid = generate_grid(&boundary(s), Extent::new(0.0, s - 0.5, 0.0, s - 0.5), CellSize::square(1.0))
            .expect("grid");
        for policy in [TouchPolicy::Queen, TouchPolicy::Rook] {
            group.bench_with_input(
                BenchmarkId::new(policy.to_string(), side * side),
                &grid,
                |b, grid| b.iter(|| build_adjacency(black_box(grid), policy).expect("adjacency")),
            );
        }
    }
    group.finish();
}

fn bench_generate_grid(c: &mut Criterion) {
    let b = boundary(40.0);
    c.bench_function("generate_grid_1600", |bench| {
        bench.iter(|| {
            generate_grid(
                black_box(&b),
                Extent::new(0.0, 39.5, 0.0, 39.5),
                CellSize::square(1.0),
            )
            .expect("grid")
        })
    });
}

criterion_group!(benches, bench_adjacency, bench_generate_grid);
criterion_main!(benches);
