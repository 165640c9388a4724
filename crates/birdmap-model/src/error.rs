//! Error types for model construction and sampling.

use thiserror::Error;

/// Errors raised while building or sampling a model.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The design matrix and the table disagree on the number of rows.
    #[error("Row count mismatch: table has {table} rows, design matrix has {design}")]
    RowCountMismatch {
        /// Table rows.
        table: usize,
        /// Design matrix rows.
        design: usize,
    },

    /// The adjacency matrix does not cover the table's cell domain.
    #[error("Adjacency mismatch: table is indexed over {table_cells} cells, matrix is {matrix} x {matrix}")]
    AdjacencyMismatch {
        /// Cells in the table's adjacency domain.
        table_cells: usize,
        /// Matrix dimension.
        matrix: usize,
    },

    /// A row references an adjacency or species index outside its domain.
    #[error("Row {row}: {dim} index {index} out of range (size {size})")]
    IndexOutOfRange {
        /// Row position.
        row: usize,
        /// Dimension name.
        dim: &'static str,
        /// Offending index.
        index: usize,
        /// Domain size.
        size: usize,
    },

    /// The design matrix contains NaN or infinity.
    #[error("Non-finite covariate {value} at row {row}, feature {feature}")]
    NonFiniteCovariate {
        /// Row position.
        row: usize,
        /// Feature position.
        feature: usize,
        /// Offending value.
        value: f64,
    },

    /// The table has no rows to fit.
    #[error("Prepared table is empty")]
    EmptyTable,

    /// Unknown or unsupported model variant.
    #[error("Invalid model spec: {0}")]
    InvalidSpec(String),

    /// A prior has invalid parameters or the wrong support for its slot.
    #[error("Invalid prior for {slot}: {reason}")]
    InvalidPrior {
        /// Parameter the prior belongs to.
        slot: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// Parameter vector length does not match the model.
    #[error("Expected {expected} parameters, got {got}")]
    DimensionMismatch {
        /// Model dimension.
        expected: usize,
        /// Supplied length.
        got: usize,
    },

    /// A posterior rate was not a finite non-negative number.
    #[error("Non-finite rate {value} at row {row}")]
    NonFiniteRate {
        /// Row position.
        row: usize,
        /// Offending value.
        value: f64,
    },

    /// Sampler settings are unusable.
    #[error("Invalid sampler configuration: {0}")]
    InvalidSampler(String),

    /// A trace with no draws cannot be summarised.
    #[error("Trace has no draws")]
    EmptyTrace,

    /// A probability argument outside `(0, 1]`.
    #[error("Probability {0} is outside (0, 1]")]
    InvalidProbability(f64),
}
