//! # birdmap-grid
//!
//! Discretizes a region into a regular lattice of rectangular cells and
//! derives the neighbour graph between them.
//!
//! ## Overview
//!
//! [`generate_grid`] lays a lattice over an [`Extent`], starting at the lower
//! left corner and stepping by the [`CellSize`]. Only cells whose polygon
//! intersects the region boundary are kept. Each retained cell is keyed by
//! its lower-left corner (see [`CellKey`]).
//!
//! [`build_adjacency`] then tests every pair of cells for touching under a
//! [`TouchPolicy`] and produces an [`AdjacencyGraph`]:
//! - the symmetric neighbour list keyed by cell key
//! - the [`IndexMapping`] from sorted cell keys to [`AdjIdx`]
//! - the dense 0/1 [`AdjacencyMatrix`] laid out by that mapping
//!
//! ## Example
//!
//! ```
//! use birdmap_grid::{build_adjacency, generate_grid, CellSize, Extent, TouchPolicy};
//! use geo::{MultiPolygon, Rect, coord};
//!
//! let square = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 }).to_polygon();
//! let boundary = MultiPolygon::new(vec![square]);
//!
//! let grid = generate_grid(&boundary, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5))?;
//! assert_eq!(grid.len(), 4);
//!
//! let graph = build_adjacency(&grid, TouchPolicy::Rook)?;
//! assert_eq!(graph.matrix().degree(birdmap_core::AdjIdx(0)), 2);
//! # Ok::<(), birdmap_grid::GridError>(())
//! ```
//!
//! [`CellKey`]: birdmap_core::CellKey
//! [`AdjIdx`]: birdmap_core::AdjIdx

mod adjacency;
mod error;
mod grid;

pub use adjacency::{build_adjacency, AdjacencyGraph, AdjacencyMatrix, IndexMapping, TouchPolicy};
pub use error::GridError;
pub use grid::{generate_grid, CellSize, Extent, Grid, GridCell};

/// Result type for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;
