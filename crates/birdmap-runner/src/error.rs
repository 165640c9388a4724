//! Pipeline error type.

use std::path::PathBuf;

use birdmap_features::FeatureError;
use birdmap_grid::{Extent, GridError};
use birdmap_model::ModelError;
use thiserror::Error;

/// Errors from loading configuration or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No lattice cell intersects the region boundary.
    #[error("No grid cells intersect the region boundary within {extent:?}")]
    NoCellsMatched {
        /// Extent the lattice was laid over.
        extent: Extent,
    },

    /// The boundary is empty and no extent was configured.
    #[error("Region boundary is empty and no extent is configured")]
    EmptyBoundary,

    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Model(#[from] ModelError),

    /// Configuration is syntactically valid but unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
