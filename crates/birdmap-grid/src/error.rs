//! Error types for grid and adjacency construction.

use birdmap_core::CellKey;
use thiserror::Error;

/// Errors that can occur while building a grid or its adjacency graph.
#[derive(Debug, Error)]
pub enum GridError {
    /// Cell dimensions must be finite and strictly positive.
    #[error("Invalid cell size {height} x {width} (must be finite and > 0)")]
    InvalidCellSize {
        /// Cell height (y step).
        height: f64,
        /// Cell width (x step).
        width: f64,
    },

    /// Extent is not finite or has max < min.
    #[error("Invalid extent x=[{xmin}, {xmax}] y=[{ymin}, {ymax}]")]
    InvalidExtent {
        /// Minimum x.
        xmin: f64,
        /// Maximum x.
        xmax: f64,
        /// Minimum y.
        ymin: f64,
        /// Maximum y.
        ymax: f64,
    },

    /// The touch test disagreed with itself when the pair was reversed.
    #[error("Asymmetric adjacency: {a} touches {b} but not the reverse")]
    AsymmetricAdjacency {
        /// Cell found to touch `b`.
        a: CellKey,
        /// Cell that did not touch `a` back.
        b: CellKey,
    },

    /// A supplied adjacency matrix is not a valid 0/1 symmetric matrix.
    #[error("Invalid adjacency matrix: {0}")]
    InvalidMatrix(String),
}
