//! Integration tests for grid generation and adjacency construction.
//!
//! Covers the unit-square scenario under both touch policies, neighbour
//! counts on larger lattices, irregular (non-rectangular) boundaries and
//! determinism of the index mapping.

use std::collections::BTreeSet;

use birdmap_core::{AdjIdx, CellKey, Idx};
use birdmap_grid::{build_adjacency, generate_grid, CellSize, Extent, Grid, TouchPolicy};
use geo::{coord, Intersects, LineString, MultiPolygon, Polygon, Rect};

fn rect_boundary(xmax: f64, ymax: f64) -> MultiPolygon<f64> {
    let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: xmax, y: ymax });
    MultiPolygon::new(vec![rect.to_polygon()])
}

/// An R x C lattice of unit cells.
fn lattice(cols: usize, rows: usize) -> Grid {
    let (w, h) = (cols as f64, rows as f64);
    generate_grid(
        &rect_boundary(w, h),
        Extent::new(0.0, w - 0.5, 0.0, h - 0.5),
        CellSize::square(1.0),
    )
    .unwrap()
}

fn degree_of(grid: &Grid, policy: TouchPolicy, x: f64, y: f64) -> usize {
    let graph = build_adjacency(grid, policy).unwrap();
    let idx = graph.mapping().get(&CellKey::from_corner(x, y)).unwrap();
    graph.matrix().degree(idx)
}

#[test]
fn test_unit_square_scenario() {
    let grid = generate_grid(
        &rect_boundary(1.0, 1.0),
        Extent::new(0.0, 1.0, 0.0, 1.0),
        CellSize::square(0.5),
    )
    .unwrap();
    let mut keys: Vec<_> = grid.keys().map(|k| k.to_string()).collect();
    keys.sort();
    assert_eq!(keys, vec!["0.0_0.0", "0.0_0.5", "0.5_0.0", "0.5_0.5"]);

    let rook = build_adjacency(&grid, TouchPolicy::Rook).unwrap();
    assert!(rook.adjacency_list().values().all(|n| n.len() == 2));

    let queen = build_adjacency(&grid, TouchPolicy::Queen).unwrap();
    assert!(queen.adjacency_list().values().all(|n| n.len() == 3));
}

#[test]
fn test_non_dyadic_step_keys_and_adjacency() {
    let boundary = MultiPolygon::new(vec![Rect::new(
        coord! { x: -125.0, y: -125.0 },
        coord! { x: -122.5, y: -122.5 },
    )
    .to_polygon()]);
    let grid = generate_grid(&boundary, Extent::new(-125.0, -122.5, -125.0, -122.5), CellSize::square(0.7)).unwrap();
    assert_eq!(grid.len(), 16);

    let corner = CellKey::from_corner(-122.89999999999999, -125.0);
    assert_eq!(corner.as_str(), "-122.89999999999999_-125.0");
    assert!(grid.contains_key(&corner));
    assert!(grid.contains_key(&CellKey::from_corner(-123.6, -122.89999999999999)));

    // Shared edges are bit-identical, so rook adjacency sees every 4-neighbour.
    let rook = build_adjacency(&grid, TouchPolicy::Rook).unwrap();
    assert_eq!(rook.matrix().edge_count(), 24);
    let neighbours = rook.neighbors_of(&corner).unwrap();
    let expected = [
        CellKey::from_corner(-123.6, -125.0),
        CellKey::from_corner(-122.89999999999999, -124.3),
    ];
    assert_eq!(neighbours, &expected.into_iter().collect::<BTreeSet<_>>());
    assert_eq!(degree_of(&grid, TouchPolicy::Rook, -124.3, -123.6), 4);
}

#[test]
fn test_rook_degrees_on_lattice() {
    let grid = lattice(4, 5);
    assert_eq!(grid.len(), 20);
    assert_eq!(degree_of(&grid, TouchPolicy::Rook, 0.0, 0.0), 2);
    assert_eq!(degree_of(&grid, TouchPolicy::Rook, 0.0, 2.0), 3);
    assert_eq!(degree_of(&grid, TouchPolicy::Rook, 2.0, 2.0), 4);
}

#[test]
fn test_queen_degrees_on_lattice() {
    let grid = lattice(4, 5);
    assert_eq!(degree_of(&grid, TouchPolicy::Queen, 3.0, 4.0), 3);
    assert_eq!(degree_of(&grid, TouchPolicy::Queen, 3.0, 2.0), 5);
    assert_eq!(degree_of(&grid, TouchPolicy::Queen, 1.0, 1.0), 8);
}

#[test]
fn test_symmetry_round_trip() {
    let graph = build_adjacency(&lattice(5, 3), TouchPolicy::Queen).unwrap();
    let list = graph.adjacency_list();
    for (a, neighbours) in list {
        assert!(!neighbours.contains(a));
        for b in neighbours {
            assert!(list[b].contains(a), "{} -> {} has no reverse", a, b);
        }
    }
}

#[test]
fn test_mapping_is_sorted_and_deterministic() {
    let grid = lattice(12, 3);
    let first = build_adjacency(&grid, TouchPolicy::Queen).unwrap();
    let second = build_adjacency(&grid, TouchPolicy::Queen).unwrap();

    let mut sorted: Vec<CellKey> = grid.keys().cloned().collect();
    sorted.sort();
    for (i, key) in sorted.iter().enumerate() {
        assert_eq!(first.mapping().get(key), Some(AdjIdx::new(i)));
    }
    assert_eq!(first.mapping(), second.mapping());
    assert_eq!(first.matrix(), second.matrix());
    // "10.0_0.0" sorts before "2.0_0.0".
    let ten = first.mapping().get(&CellKey::from_corner(10.0, 0.0)).unwrap();
    let two = first.mapping().get(&CellKey::from_corner(2.0, 0.0)).unwrap();
    assert!(ten < two);
}

#[test]
fn test_triangle_boundary() {
    // Right triangle below the diagonal of a 4x4 extent.
    let triangle = Polygon::new(
        LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0), (0.0, 0.0)]),
        vec![],
    );
    let boundary = MultiPolygon::new(vec![triangle]);
    let grid = generate_grid(&boundary, Extent::new(0.0, 3.5, 0.0, 3.5), CellSize::square(1.0)).unwrap();

    for cell in grid.cells() {
        assert!(boundary.intersects(&cell.polygon));
        let (x, y) = cell.corner();
        assert!(x <= 3.5 && y <= 3.5);
    }
    // Cell (3, 3) lies entirely above the diagonal.
    assert!(!grid.contains_key(&CellKey::from_corner(3.0, 3.0)));
    assert!(!grid.contains_key(&CellKey::from_corner(3.0, 2.0)));
    // Cell (3, 1) touches the diagonal only at its lower-left corner.
    assert!(grid.contains_key(&CellKey::from_corner(3.0, 1.0)));

    let graph = build_adjacency(&grid, TouchPolicy::Rook).unwrap();
    assert!(graph.matrix().is_symmetric());
    assert!(graph.matrix().has_zero_diagonal());
}

#[test]
fn test_disconnected_islands() {
    // Two unit squares far apart, each covering exactly one cell.
    let a = Rect::new(coord! { x: 0.2, y: 0.2 }, coord! { x: 0.8, y: 0.8 }).to_polygon();
    let b = Rect::new(coord! { x: 5.2, y: 5.2 }, coord! { x: 5.8, y: 5.8 }).to_polygon();
    let boundary = MultiPolygon::new(vec![a, b]);
    let grid = generate_grid(&boundary, Extent::new(0.0, 5.5, 0.0, 5.5), CellSize::square(1.0)).unwrap();
    assert_eq!(grid.len(), 2);

    let graph = build_adjacency(&grid, TouchPolicy::Queen).unwrap();
    assert_eq!(graph.matrix().edge_count(), 0);
    assert_eq!(graph.matrix().isolated().len(), 2);
}
