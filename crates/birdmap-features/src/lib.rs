//! # birdmap-features
//!
//! Turns raw inputs into the model-ready [`PreparedTable`]:
//!
//! 1. Per-cell remote-sensing statistics ([`RawCellStats`]) are fetched by a
//!    [`CovariateSource`] and converted to [`CellCovariates`] (Celsius
//!    temperatures, land cover as counts or Laplace-smoothed fractions).
//! 2. Observation records are joined onto grid cells, optionally reduced to
//!    the most frequent species, and counted per (species, cell).
//! 3. The species x cell cross product is built with covariates attached and
//!    rows sorted by adjacency index.
//! 4. A [`ScalingSpec`] selects covariate columns, log-transforms the skewed
//!    ones and standardizes them into a [`DesignMatrix`].

mod covariates;
mod error;
mod land_cover;
mod observations;
mod retrieval;
mod scaling;
mod table;

pub use covariates::{
    modis_to_celsius, CellCovariates, Covariate, CovariateTable, Percentile, Percentiles, RawCellStats,
    RawPercentiles,
};
pub use error::FeatureError;
pub use land_cover::{LandCover, LandCoverHistogram, LandCoverMode, LAND_COVER_CLASSES};
pub use observations::{
    count_observations, join_observations, relabel_top_species, JoinResult, JoinedObservation, ObservationRecord,
    OTHER_LABEL,
};
pub use retrieval::{collect_covariates, CovariateSource, RetrievalConfig, RetrievalStats, SourceError};
pub use scaling::{fit_scaling, DesignMatrix, FittedScaling, ScalingSpec, INTERCEPT_COLUMN};
pub use table::{prepare_table, PreparedRow, PreparedTable};

/// Result type for feature pipeline operations.
pub type Result<T> = std::result::Result<T, FeatureError>;
