//! # birdmap-runner
//!
//! Wires the workspace together: a YAML [`PipelineConfig`], tracing setup and
//! [`run_pipeline`], which takes a region boundary, observation records and
//! cell covariates through gridding, adjacency, table preparation, model
//! fitting and posterior summaries into a serialisable [`RunReport`].
//!
//! Reading observation files, calling remote-sensing services and plotting
//! are left to the host: observations arrive as
//! [`ObservationRecord`](birdmap_features::ObservationRecord)s and
//! covariates either precomputed or through a
//! [`CovariateSource`](birdmap_features::CovariateSource).

mod config;
mod error;
mod logging;
mod pipeline;

pub use config::{FeatureConfig, GridConfig, ModelConfig, PipelineConfig, PosteriorConfig};
pub use error::PipelineError;
pub use logging::init_tracing;
pub use pipeline::{fit, prepare, run_pipeline, Covariates, FitReport, PreparedRun, RunReport};
