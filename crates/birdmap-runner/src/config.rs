//! Pipeline configuration, loaded from YAML.
//!
//! Every section has defaults, so an empty document is a valid
//! configuration. Unknown keys are rejected.
//!
//! ```yaml
//! region: bogota
//! grid:
//!   cell_size: { height: 0.25, width: 0.25 }
//!   touch_policy: rook
//! features:
//!   max_species: 10
//!   land_cover_mode: laplace
//! model:
//!   name: varying_intercept_pooled_covariate_car
//!   missing_counts: masked
//!   priors:
//!     sigma_phi: { dist: uniform, lower: 0.0, upper: 10.0 }
//! sampler:
//!   chains: 4
//!   draws: 1000
//! ```

use std::path::Path;

use birdmap_features::{LandCoverMode, RetrievalConfig, ScalingSpec};
use birdmap_grid::{CellSize, Extent, TouchPolicy};
use birdmap_model::{MissingCounts, ModelOptions, ModelSpec, PriorConfig, SamplerConfig};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Lattice and adjacency settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GridConfig {
    /// Lattice extent. Defaults to the boundary's bounding box.
    pub extent: Option<Extent>,
    pub cell_size: CellSize,
    pub touch_policy: TouchPolicy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            extent: None,
            cell_size: CellSize::square(0.5),
            touch_policy: TouchPolicy::default(),
        }
    }
}

/// Table preparation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    /// Keep the `n` most frequent species, folding the rest into `other`.
    pub max_species: Option<usize>,
    pub land_cover_mode: LandCoverMode,
    pub scaling: ScalingSpec,
}

/// Which model to fit and how.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    /// Family member, by name.
    pub name: ModelSpec,
    pub priors: PriorConfig,
    pub missing_counts: MissingCounts,
    /// Fit one model per species for the `n` species with the most
    /// observed cells, instead of one joint model.
    pub per_species: Option<usize>,
}

impl ModelConfig {
    pub fn options(&self) -> ModelOptions {
        ModelOptions {
            priors: self.priors.clone(),
            missing_counts: self.missing_counts,
        }
    }
}

/// Posterior summary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PosteriorConfig {
    /// Probability mass of the highest-density intervals.
    pub hdi_prob: f64,
    /// Seed of the predictive draws. Defaults to the sampler seed.
    pub predictive_seed: Option<u64>,
}

impl Default for PosteriorConfig {
    fn default() -> Self {
        Self {
            hdi_prob: 0.95,
            predictive_seed: None,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Region name, used as a metric label and in the report.
    pub region: String,
    pub grid: GridConfig,
    pub features: FeatureConfig,
    pub model: ModelConfig,
    pub sampler: SamplerConfig,
    pub posterior: PosteriorConfig,
    pub retrieval: RetrievalConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            region: "region".to_string(),
            grid: GridConfig::default(),
            features: FeatureConfig::default(),
            model: ModelConfig::default(),
            sampler: SamplerConfig::default(),
            posterior: PosteriorConfig::default(),
            retrieval: RetrievalConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.features.scaling.validate()?;
        self.model.name.validate()?;
        self.model.priors.validate()?;
        self.sampler.validate()?;
        if self.features.max_species == Some(0) {
            return Err(PipelineError::Config("features.max_species must be at least 1".into()));
        }
        if self.model.per_species == Some(0) {
            return Err(PipelineError::Config("model.per_species must be at least 1".into()));
        }
        let p = self.posterior.hdi_prob;
        if !(p > 0.0 && p <= 1.0) {
            return Err(PipelineError::Config(format!("posterior.hdi_prob {} must be in (0, 1]", p)));
        }
        if self.retrieval.parallelism == 0 {
            return Err(PipelineError::Config("retrieval.parallelism must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use birdmap_features::Covariate;
    use birdmap_model::{CovariateKind, InterceptKind, Prior};

    #[test]
    fn test_empty_document_is_default() {
        let config = PipelineConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.model.name.to_string(), "pooled_intercept_pooled_covariate_car");
        assert_eq!(config.sampler.draws, 1000);
    }

    #[test]
    fn test_full_document() {
        let yaml = r#"
region: bogota
grid:
  extent: { xmin: -74.5, xmax: -73.5, ymin: 4.0, ymax: 5.0 }
  cell_size: { height: 0.25, width: 0.25 }
  touch_policy: rook
features:
  max_species: 10
  land_cover_mode: laplace
  scaling:
    columns: [population_density, elevation_p50, land_cover_09]
    log_columns: [population_density]
model:
  name: intercept_car
  missing_counts: zero
  per_species: 3
  priors:
    sigma_phi: { dist: uniform, lower: 0.0, upper: 10.0 }
    alpha: { dist: beta, alpha: 2.0, beta: 2.0 }
sampler:
  chains: 2
  draws: 200
  seed: 7
posterior:
  hdi_prob: 0.9
retrieval:
  parallelism: 16
"#;
        let config = PipelineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.region, "bogota");
        assert_eq!(config.grid.touch_policy, TouchPolicy::Rook);
        assert_eq!(config.grid.extent.unwrap().xmin, -74.5);
        assert_eq!(config.features.land_cover_mode, LandCoverMode::Laplace);
        assert_eq!(config.features.scaling.columns[2], "land_cover_09".parse::<Covariate>().unwrap());
        assert_eq!(config.model.name.intercept, InterceptKind::Pooled);
        assert_eq!(config.model.name.covariates, CovariateKind::None);
        assert_eq!(config.model.missing_counts, MissingCounts::Zero);
        assert_eq!(config.model.per_species, Some(3));
        assert_eq!(config.model.priors.sigma_phi, Prior::Uniform { lower: 0.0, upper: 10.0 });
        assert_eq!(config.model.priors.intercept, Prior::Normal { mu: 0.0, sigma: 100.0 });
        assert_eq!(config.sampler.chains, 2);
        assert_eq!(config.sampler.tune, 1000);
        assert_eq!(config.posterior.hdi_prob, 0.9);
        assert_eq!(config.retrieval.parallelism, 16);
        assert_eq!(config.retrieval.max_retries, 3);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(PipelineConfig::from_yaml_str("grid: { cell_size: { height: 1.0, width: 1.0 }, colour: red }").is_err());
        assert!(PipelineConfig::from_yaml_str("verbose: true").is_err());
    }

    #[test]
    fn test_unknown_model_rejected() {
        let err = PipelineConfig::from_yaml_str("model: { name: random_forest }").unwrap_err();
        assert!(matches!(err, PipelineError::Yaml(_)));
    }

    #[test]
    fn test_validation() {
        let err = PipelineConfig::from_yaml_str("posterior: { hdi_prob: 1.5 }").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));

        let err = PipelineConfig::from_yaml_str("sampler: { chains: 0 }").unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));

        let err = PipelineConfig::from_yaml_str("features: { scaling: { columns: [elevation_p5], log_columns: [population_density] } }")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Feature(_)));

        let err = PipelineConfig::from_yaml_str("model: { priors: { betas_sigma: { dist: normal, mu: 0.0, sigma: 1.0 } } }")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Model(_)));
    }

    #[test]
    fn test_yaml_round_trip() {
        let mut config = PipelineConfig::default();
        config.model.name = "varying_intercept_varying_covariate".parse().unwrap();
        config.grid.touch_policy = TouchPolicy::Rook;
        let yaml = config.to_yaml().unwrap();
        assert_eq!(PipelineConfig::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_file("/nonexistent/birdmap.yaml").unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
