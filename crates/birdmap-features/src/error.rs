//! Error types for the feature pipeline.

use birdmap_core::CellKey;
use thiserror::Error;

/// Errors raised while preparing covariates and the model table.
#[derive(Debug, Error)]
pub enum FeatureError {
    /// Grid cells without covariate data. Every model input must be complete.
    #[error("{count} grid cell(s) have no covariates (e.g. {sample})")]
    MissingCovariates {
        /// Number of cells missing.
        count: usize,
        /// A few of the missing keys, comma separated.
        sample: String,
    },

    /// Covariates were supplied for a cell that is not in the index mapping.
    #[error("Covariates supplied for unknown cell {0}")]
    UnknownCell(CellKey),

    /// The remote source returned no value for a covariate.
    #[error("No value for {covariate} in cell {cell}")]
    MissingCovariateValue {
        /// Cell key.
        cell: CellKey,
        /// Covariate column name.
        covariate: String,
    },

    /// A log-transformed column has a negative value.
    #[error("Cannot log-transform {covariate} = {value} in cell {cell} (must be >= 0)")]
    NegativeLogInput {
        /// Cell key.
        cell: CellKey,
        /// Covariate column name.
        covariate: String,
        /// Offending value.
        value: f64,
    },

    /// A covariate value is NaN or infinite.
    #[error("Non-finite {covariate} = {value} in cell {cell}")]
    NonFiniteCovariate {
        /// Cell key.
        cell: CellKey,
        /// Covariate column name.
        covariate: String,
        /// Offending value.
        value: f64,
    },

    /// Unrecognised covariate column name.
    #[error("Unknown covariate '{0}'")]
    UnknownCovariate(String),

    /// Scaling configuration is inconsistent.
    #[error("Invalid scaling spec: {0}")]
    InvalidScaling(String),

    /// The covariate source failed permanently or ran out of retries.
    #[error("Covariate retrieval failed for cell {cell} after {attempts} attempt(s): {message}")]
    Retrieval {
        /// Cell key.
        cell: CellKey,
        /// Attempts made.
        attempts: u32,
        /// Last error reported by the source.
        message: String,
    },

    /// The retrieval worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    ThreadPool(String),
}
