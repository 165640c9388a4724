//! # birdmap-model
//!
//! A family of hierarchical Poisson regressions over the prepared table:
//!
//! ```text
//! y[i]  ~ Poisson(mu[i])
//! mu[i] = exp(intercept[s] + X[i] . betas[s] + phi[adj])
//! ```
//!
//! where `s` is the row's species and `adj` its cell. A [`ModelSpec`]
//! chooses whether the intercept and the covariate coefficients are pooled
//! across species or varying by species, and whether the CAR spatial effect
//! `phi` is included. One builder, [`build_model`], handles every variant.
//!
//! The built [`SpatialModel`] is an unnormalised log density on an
//! unconstrained parameter vector plus the named, dimension-tagged variables
//! derived from it. Any [`InferenceEngine`] can sample it; the crate ships
//! [`MetropolisSampler`] as the reference engine. [`posterior`] turns a
//! [`Trace`] into summaries and posterior predictive draws.
//!
//! ## Example
//!
//! ```no_run
//! use birdmap_model::{build_model, InferenceEngine, MetropolisSampler, ModelOptions, ModelSpec, SamplerConfig};
//! # fn run(
//! #     table: &birdmap_features::PreparedTable,
//! #     design: &birdmap_features::DesignMatrix,
//! #     adjacency: &birdmap_grid::AdjacencyMatrix,
//! # ) -> Result<(), birdmap_model::ModelError> {
//! let spec: ModelSpec = "varying_intercept_pooled_covariate_car".parse()?;
//! let model = build_model(spec, table, design, adjacency, &ModelOptions::default())?;
//! let trace = MetropolisSampler::new(SamplerConfig::default()).sample(&model)?;
//! let summary = birdmap_model::posterior::summarize(&model, &trace, 0.95)?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod car;
mod error;
mod inference;
pub mod posterior;
mod priors;
mod spec;

pub use builder::{
    build_model, Coords, Dim, Dims, MissingCounts, ModelOptions, ModelState, Shape, SpatialModel, Variable,
};
pub use car::CarPrior;
pub use error::ModelError;
pub use inference::{ChainTrace, InferenceEngine, MetropolisSampler, SamplerConfig, Trace};
pub use posterior::{PosteriorPredictive, PredictionRow, SummaryRow};
pub use priors::{Prior, PriorConfig, Transform};
pub use spec::{CovariateKind, InterceptKind, ModelSpec};

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
