//! # birdmap-core
//!
//! Shared types for the birdmap species distribution pipeline.
//!
//! Every array handed between the pipeline stages is aligned against one of
//! four coordinate domains:
//!
//! - [`AdjIdx`] - position of a grid cell in sorted cell-key order
//! - [`ObsIdx`] - row of the prepared table
//! - [`SpeciesIdx`] - position of a species label in sorted label order
//! - [`FeatureIdx`] - column of the scaled design matrix
//!
//! Arrays are stored in an [`IdxVec`] tagged with the domain they are indexed
//! by, so that using an adjacency index to read a per-row array is a type
//! error rather than a silent misalignment.

mod index;
mod key;

pub use index::{AdjIdx, FeatureIdx, Idx, IdxVec, ObsIdx, SpeciesIdx};
pub use key::CellKey;
