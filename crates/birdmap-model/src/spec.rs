//! Model family membership.

use std::fmt;
use std::str::FromStr;

use crate::{ModelError, Result};

/// How the intercept is shared across species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum InterceptKind {
    /// One global intercept.
    Pooled,
    /// One intercept per species around a shared mean.
    Varying,
}

/// How covariate coefficients are shared across species.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CovariateKind {
    /// No covariate term.
    None,
    /// One coefficient vector for all species.
    Pooled,
    /// One coefficient vector per species.
    Varying,
}

/// One member of the model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelSpec {
    pub intercept: InterceptKind,
    pub covariates: CovariateKind,
    /// Include the CAR spatial effect.
    pub spatial: bool,
}

impl ModelSpec {
    pub const fn new(intercept: InterceptKind, covariates: CovariateKind, spatial: bool) -> Self {
        Self {
            intercept,
            covariates,
            spatial,
        }
    }

    /// Every valid variant, in a fixed order.
    pub fn family() -> Vec<ModelSpec> {
        let mut out = Vec::new();
        for intercept in [InterceptKind::Pooled, InterceptKind::Varying] {
            for covariates in [CovariateKind::None, CovariateKind::Pooled, CovariateKind::Varying] {
                for spatial in [false, true] {
                    let spec = ModelSpec::new(intercept, covariates, spatial);
                    if spec.validate().is_ok() {
                        out.push(spec);
                    }
                }
            }
        }
        out
    }

    /// A single pooled intercept with nothing else cannot distinguish species
    /// or cells, so it is not part of the family.
    pub fn validate(&self) -> Result<()> {
        if self.intercept == InterceptKind::Pooled && self.covariates == CovariateKind::None && !self.spatial {
            return Err(ModelError::InvalidSpec(
                "pooled intercept without covariates or spatial term".into(),
            ));
        }
        Ok(())
    }

    pub fn uses_species(&self) -> bool {
        self.intercept == InterceptKind::Varying || self.covariates == CovariateKind::Varying
    }

    pub fn uses_covariates(&self) -> bool {
        self.covariates != CovariateKind::None
    }

    /// Canonical name, e.g. `varying_intercept_pooled_covariate_car`.
    pub fn name(&self) -> String {
        let mut name = match self.intercept {
            InterceptKind::Pooled => "pooled_intercept".to_string(),
            InterceptKind::Varying => "varying_intercept".to_string(),
        };
        match self.covariates {
            CovariateKind::None => {}
            CovariateKind::Pooled => name.push_str("_pooled_covariate"),
            CovariateKind::Varying => name.push_str("_varying_covariate"),
        }
        if self.spatial {
            name.push_str("_car");
        }
        name
    }

    /// Parse a canonical name or one of the short aliases
    /// `intercept_car` and `intercept_covariate_car`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        match s {
            "intercept_car" => {
                return Ok(ModelSpec::new(InterceptKind::Pooled, CovariateKind::None, true))
            }
            "intercept_covariate_car" => {
                return Ok(ModelSpec::new(InterceptKind::Pooled, CovariateKind::Pooled, true))
            }
            _ => {}
        }
        ModelSpec::family()
            .into_iter()
            .find(|spec| spec.name() == s)
            .ok_or_else(|| ModelError::InvalidSpec(format!("unknown model '{}'", s)))
    }
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::new(InterceptKind::Pooled, CovariateKind::Pooled, true)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ModelSpec {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self> {
        ModelSpec::parse(s)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ModelSpec {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.name())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ModelSpec {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        ModelSpec::parse(&s).map_err(serde::de::Error::custom)
    }
}
