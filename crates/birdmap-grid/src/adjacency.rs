//! Neighbour graph, index mapping and adjacency matrix for a [`Grid`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use birdmap_core::{AdjIdx, CellKey, Idx, IdxVec};
use geo::Intersects;
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::grid::{Grid, GridCell};
use crate::{GridError, Result};

// ============================================================================
// Touch policy
// ============================================================================

/// Which kind of contact makes two cells neighbours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TouchPolicy {
    /// Any shared boundary point, corners included (8-neighbourhood).
    #[default]
    Queen,
    /// A shared edge of positive length (4-neighbourhood).
    Rook,
}

impl TouchPolicy {
    /// Whether `a` and `b` are neighbours under this policy.
    fn touches(self, a: &GridCell, b: &GridCell) -> bool {
        if !a.polygon.intersects(&b.polygon) {
            return false;
        }
        match self {
            TouchPolicy::Queen => true,
            TouchPolicy::Rook => {
                let overlap_x = a.rect.max().x.min(b.rect.max().x) - a.rect.min().x.max(b.rect.min().x);
                let overlap_y = a.rect.max().y.min(b.rect.max().y) - a.rect.min().y.max(b.rect.min().y);
                let eps = 1e-9 * a.rect.width().max(a.rect.height());
                overlap_x > eps || overlap_y > eps
            }
        }
    }
}

impl fmt::Display for TouchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TouchPolicy::Queen => write!(f, "queen"),
            TouchPolicy::Rook => write!(f, "rook"),
        }
    }
}

impl FromStr for TouchPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "queen" => Ok(TouchPolicy::Queen),
            "rook" => Ok(TouchPolicy::Rook),
            other => Err(format!("unknown touch policy '{}', expected 'queen' or 'rook'", other)),
        }
    }
}

// ============================================================================
// Index mapping
// ============================================================================

/// Canonical cell ordering: keys sorted as strings, numbered from 0.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMapping {
    keys: IdxVec<AdjIdx, CellKey>,
    lookup: HashMap<CellKey, AdjIdx>,
}

impl IndexMapping {
    /// Sort `keys` and assign consecutive indices. Duplicates are collapsed.
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = &'a CellKey>) -> Self {
        let sorted: BTreeSet<&CellKey> = keys.into_iter().collect();
        let keys: IdxVec<AdjIdx, CellKey> = sorted.into_iter().cloned().collect();
        let lookup = keys.iter_enumerated().map(|(i, k)| (k.clone(), i)).collect();
        Self { keys, lookup }
    }

    pub fn get(&self, key: &CellKey) -> Option<AdjIdx> {
        self.lookup.get(key).copied()
    }

    pub fn key(&self, idx: AdjIdx) -> &CellKey {
        &self.keys[idx]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `(index, key)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (AdjIdx, &CellKey)> + '_ {
        self.keys.iter_enumerated()
    }

    pub fn keys(&self) -> &IdxVec<AdjIdx, CellKey> {
        &self.keys
    }
}

// ============================================================================
// Adjacency matrix
// ============================================================================

/// Dense symmetric 0/1 matrix over the [`AdjIdx`] domain with zero diagonal.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjacencyMatrix {
    inner: DMatrix<u8>,
}

impl AdjacencyMatrix {
    /// Build an `n x n` matrix from undirected edges.
    ///
    /// # Errors
    ///
    /// [`GridError::InvalidMatrix`] for self-loops or out-of-range indices.
    pub fn from_edges(n: usize, edges: &[(AdjIdx, AdjIdx)]) -> Result<Self> {
        let mut inner = DMatrix::<u8>::zeros(n, n);
        for &(a, b) in edges {
            let (i, j) = (a.index(), b.index());
            if i >= n || j >= n {
                return Err(GridError::InvalidMatrix(format!(
                    "edge ({}, {}) out of range for {} cells",
                    i, j, n
                )));
            }
            if i == j {
                return Err(GridError::InvalidMatrix(format!("self-loop at {}", i)));
            }
            inner[(i, j)] = 1;
            inner[(j, i)] = 1;
        }
        Ok(Self { inner })
    }

    /// Wrap an existing matrix after checking it is square, symmetric, 0/1
    /// and has a zero diagonal.
    pub fn from_dense(inner: DMatrix<u8>) -> Result<Self> {
        if inner.nrows() != inner.ncols() {
            return Err(GridError::InvalidMatrix(format!(
                "not square: {} x {}",
                inner.nrows(),
                inner.ncols()
            )));
        }
        let n = inner.nrows();
        for i in 0..n {
            if inner[(i, i)] != 0 {
                return Err(GridError::InvalidMatrix(format!("non-zero diagonal at {}", i)));
            }
            for j in 0..n {
                let v = inner[(i, j)];
                if v > 1 {
                    return Err(GridError::InvalidMatrix(format!("entry ({}, {}) = {}", i, j, v)));
                }
                if v != inner[(j, i)] {
                    return Err(GridError::InvalidMatrix(format!("asymmetric at ({}, {})", i, j)));
                }
            }
        }
        Ok(Self { inner })
    }

    /// Number of cells.
    pub fn n(&self) -> usize {
        self.inner.nrows()
    }

    pub fn get(&self, i: AdjIdx, j: AdjIdx) -> u8 {
        self.inner[(i.index(), j.index())]
    }

    pub fn degree(&self, i: AdjIdx) -> usize {
        self.inner.row(i.index()).iter().map(|&v| v as usize).sum()
    }

    pub fn degrees(&self) -> IdxVec<AdjIdx, usize> {
        (0..self.n()).map(|i| self.degree(AdjIdx::new(i))).collect()
    }

    /// Neighbours of `i` in index order.
    pub fn neighbors(&self, i: AdjIdx) -> Vec<AdjIdx> {
        self.inner
            .row(i.index())
            .iter()
            .enumerate()
            .filter(|(_, &v)| v == 1)
            .map(|(j, _)| AdjIdx::new(j))
            .collect()
    }

    /// Undirected edges `(i, j)` with `i < j`, in row-major order.
    pub fn edges(&self) -> Vec<(AdjIdx, AdjIdx)> {
        let n = self.n();
        let mut out = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if self.inner[(i, j)] == 1 {
                    out.push((AdjIdx::new(i), AdjIdx::new(j)));
                }
            }
        }
        out
    }

    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    pub fn is_symmetric(&self) -> bool {
        self.inner == self.inner.transpose()
    }

    pub fn has_zero_diagonal(&self) -> bool {
        self.inner.diagonal().iter().all(|&v| v == 0)
    }

    /// Cells with no neighbours.
    pub fn isolated(&self) -> Vec<AdjIdx> {
        self.degrees()
            .iter_enumerated()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn as_matrix(&self) -> &DMatrix<u8> {
        &self.inner
    }

    pub fn to_f64(&self) -> DMatrix<f64> {
        self.inner.map(|v| v as f64)
    }
}

// ============================================================================
// Adjacency graph
// ============================================================================

/// Neighbour list, index mapping and matrix built from one grid.
#[derive(Debug, Clone)]
pub struct AdjacencyGraph {
    policy: TouchPolicy,
    neighbors: BTreeMap<CellKey, BTreeSet<CellKey>>,
    mapping: IndexMapping,
    matrix: AdjacencyMatrix,
}

impl AdjacencyGraph {
    pub fn policy(&self) -> TouchPolicy {
        self.policy
    }

    /// Neighbour keys of every cell. Cells without neighbours map to an
    /// empty set.
    pub fn adjacency_list(&self) -> &BTreeMap<CellKey, BTreeSet<CellKey>> {
        &self.neighbors
    }

    pub fn neighbors_of(&self, key: &CellKey) -> Option<&BTreeSet<CellKey>> {
        self.neighbors.get(key)
    }

    pub fn mapping(&self) -> &IndexMapping {
        &self.mapping
    }

    pub fn matrix(&self) -> &AdjacencyMatrix {
        &self.matrix
    }

    pub fn into_parts(self) -> (BTreeMap<CellKey, BTreeSet<CellKey>>, IndexMapping, AdjacencyMatrix) {
        (self.neighbors, self.mapping, self.matrix)
    }
}

/// Build the neighbour graph of `grid`.
///
/// Every pair of cells is tested once in parallel. When `a` is found to touch
/// `b`, the reverse test is also run and must agree, otherwise the build fails
/// with [`GridError::AsymmetricAdjacency`]. The matrix is then laid out from
/// the sorted-key [`IndexMapping`].
///
/// Isolated cells and a graph with no edges at all are logged as warnings.
pub fn build_adjacency(grid: &Grid, policy: TouchPolicy) -> Result<AdjacencyGraph> {
    let cells = grid.cells();
    let n = cells.len();

    let mut pairs: Vec<(usize, usize)> = Vec::with_capacity(n * n.saturating_sub(1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            pairs.push((i, j));
        }
    }

    debug!(
        cells = n,
        pairs = pairs.len(),
        threads = rayon::current_num_threads(),
        %policy,
        "testing cell pairs for adjacency"
    );

    let found: Vec<(usize, usize, bool)> = pairs
        .par_iter()
        .filter_map(|&(i, j)| {
            let (a, b) = (&cells[i], &cells[j]);
            if !bounds_overlap(a, b) {
                return None;
            }
            if policy.touches(a, b) {
                Some((i, j, policy.touches(b, a)))
            } else {
                None
            }
        })
        .collect();

    let mut neighbors: BTreeMap<CellKey, BTreeSet<CellKey>> =
        cells.iter().map(|c| (c.key.clone(), BTreeSet::new())).collect();
    for (i, j, reverse) in found {
        let (a, b) = (&cells[i].key, &cells[j].key);
        if !reverse {
            return Err(GridError::AsymmetricAdjacency {
                a: a.clone(),
                b: b.clone(),
            });
        }
        neighbors.entry(a.clone()).or_default().insert(b.clone());
        neighbors.entry(b.clone()).or_default().insert(a.clone());
    }

    let mapping = IndexMapping::from_keys(grid.keys());
    let mut edges = Vec::new();
    for (key, others) in &neighbors {
        // Keys come from the grid, so the mapping always has them.
        let Some(i) = mapping.get(key) else { continue };
        for other in others {
            if let Some(j) = mapping.get(other) {
                if i < j {
                    edges.push((i, j));
                }
            }
        }
    }
    let matrix = AdjacencyMatrix::from_edges(n, &edges)?;

    let isolated = matrix.isolated();
    if n >= 2 && edges.is_empty() {
        warn!(cells = n, "adjacency graph has no edges; every cell is disconnected");
    } else if !isolated.is_empty() {
        let sample: Vec<&str> = isolated.iter().take(5).map(|&i| mapping.key(i).as_str()).collect();
        warn!(count = isolated.len(), ?sample, "cells without neighbours");
    }

    info!(cells = n, edges = edges.len(), isolated = isolated.len(), "built adjacency graph");

    Ok(AdjacencyGraph {
        policy,
        neighbors,
        mapping,
        matrix,
    })
}

/// Closed bounding boxes overlap or touch.
fn bounds_overlap(a: &GridCell, b: &GridCell) -> bool {
    a.rect.min().x <= b.rect.max().x
        && b.rect.min().x <= a.rect.max().x
        && a.rect.min().y <= b.rect.max().y
        && b.rect.min().y <= a.rect.max().y
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{generate_grid, CellSize, Extent};
    use geo::{coord, MultiPolygon, Rect};

    fn lattice(cols: usize, rows: usize) -> Grid {
        let (w, h) = (cols as f64, rows as f64);
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: w, y: h });
        let boundary = MultiPolygon::new(vec![rect.to_polygon()]);
        // Shrink max by half a step so exactly cols x rows cells are produced.
        generate_grid(&boundary, Extent::new(0.0, w - 0.5, 0.0, h - 0.5), CellSize::square(1.0)).unwrap()
    }

    fn key(x: f64, y: f64) -> CellKey {
        CellKey::from_corner(x, y)
    }

    #[test]
    fn test_touch_policy_parse() {
        assert_eq!("Queen".parse::<TouchPolicy>().unwrap(), TouchPolicy::Queen);
        assert_eq!("rook".parse::<TouchPolicy>().unwrap(), TouchPolicy::Rook);
        assert!("bishop".parse::<TouchPolicy>().is_err());
    }

    #[test]
    fn test_mapping_sorted_lexicographically() {
        let keys = vec![key(10.0, 0.0), key(2.0, 0.0), key(1.0, 0.0)];
        let mapping = IndexMapping::from_keys(&keys);
        assert_eq!(mapping.key(AdjIdx(0)).as_str(), "1.0_0.0");
        assert_eq!(mapping.key(AdjIdx(1)).as_str(), "10.0_0.0");
        assert_eq!(mapping.key(AdjIdx(2)).as_str(), "2.0_0.0");
        assert_eq!(mapping.get(&key(2.0, 0.0)), Some(AdjIdx(2)));
        assert_eq!(mapping.get(&key(3.0, 0.0)), None);
    }

    #[test]
    fn test_rook_two_by_two() {
        let grid = lattice(2, 2);
        assert_eq!(grid.len(), 4);
        let graph = build_adjacency(&grid, TouchPolicy::Rook).unwrap();
        for (_, others) in graph.adjacency_list() {
            assert_eq!(others.len(), 2);
        }
        let n = graph.neighbors_of(&key(0.0, 0.0)).unwrap();
        assert!(n.contains(&key(0.0, 1.0)));
        assert!(n.contains(&key(1.0, 0.0)));
        assert!(!n.contains(&key(1.0, 1.0)));
    }

    #[test]
    fn test_queen_two_by_two() {
        let graph = build_adjacency(&lattice(2, 2), TouchPolicy::Queen).unwrap();
        for (_, others) in graph.adjacency_list() {
            assert_eq!(others.len(), 3);
        }
        assert_eq!(graph.matrix().edge_count(), 6);
    }

    #[test]
    fn test_matrix_matches_list() {
        let graph = build_adjacency(&lattice(3, 4), TouchPolicy::Queen).unwrap();
        let m = graph.matrix();
        let mapping = graph.mapping();
        assert!(m.is_symmetric());
        assert!(m.has_zero_diagonal());
        for (i, ki) in mapping.iter() {
            for (j, kj) in mapping.iter() {
                let listed = graph.neighbors_of(ki).unwrap().contains(kj);
                assert_eq!(m.get(i, j) == 1, listed, "{} / {}", ki, kj);
            }
        }
    }

    #[test]
    fn test_single_cell_isolated() {
        let grid = lattice(1, 1);
        let graph = build_adjacency(&grid, TouchPolicy::Queen).unwrap();
        assert_eq!(graph.matrix().n(), 1);
        assert_eq!(graph.matrix().isolated(), vec![AdjIdx(0)]);
    }

    #[test]
    fn test_from_dense_validation() {
        let ok = DMatrix::from_row_slice(2, 2, &[0u8, 1, 1, 0]);
        assert!(AdjacencyMatrix::from_dense(ok).is_ok());

        let asym = DMatrix::from_row_slice(2, 2, &[0u8, 1, 0, 0]);
        assert!(AdjacencyMatrix::from_dense(asym).is_err());

        let diag = DMatrix::from_row_slice(2, 2, &[1u8, 0, 0, 0]);
        assert!(AdjacencyMatrix::from_dense(diag).is_err());

        let rect = DMatrix::<u8>::zeros(2, 3);
        assert!(AdjacencyMatrix::from_dense(rect).is_err());
    }

    #[test]
    fn test_from_edges_rejects_self_loop() {
        assert!(AdjacencyMatrix::from_edges(3, &[(AdjIdx(1), AdjIdx(1))]).is_err());
        assert!(AdjacencyMatrix::from_edges(3, &[(AdjIdx(1), AdjIdx(3))]).is_err());
    }
}
