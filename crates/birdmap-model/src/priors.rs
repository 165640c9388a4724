//! Prior distributions and the transforms to unconstrained space.

use statrs::distribution::{Beta, Continuous, Exp, Normal, Uniform};

use crate::{ModelError, Result};

/// A univariate prior. Every scale parameter is a standard deviation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "dist", rename_all = "lowercase", deny_unknown_fields))]
pub enum Prior {
    Normal { mu: f64, sigma: f64 },
    Exponential { rate: f64 },
    Uniform { lower: f64, upper: f64 },
    Beta { alpha: f64, beta: f64 },
}

/// Map from the real line onto a prior's support.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transform {
    /// `x = u`
    Identity,
    /// `x = exp(u)`
    Log,
    /// `x = lower + (upper - lower) * sigmoid(u)`
    Interval { lower: f64, upper: f64 },
}

fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl Transform {
    /// Constrained value for `u`.
    pub fn forward(&self, u: f64) -> f64 {
        match *self {
            Transform::Identity => u,
            Transform::Log => u.exp(),
            Transform::Interval { lower, upper } => lower + (upper - lower) * sigmoid(u),
        }
    }

    /// Unconstrained value for `x`, which must lie inside the support.
    pub fn inverse(&self, x: f64) -> f64 {
        match *self {
            Transform::Identity => x,
            Transform::Log => x.ln(),
            Transform::Interval { lower, upper } => {
                let p = (x - lower) / (upper - lower);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// `ln |dx/du|` at `u`.
    pub fn log_jacobian(&self, u: f64) -> f64 {
        match *self {
            Transform::Identity => 0.0,
            Transform::Log => u,
            Transform::Interval { lower, upper } => (upper - lower).ln() - softplus(-u) - softplus(u),
        }
    }
}

/// A [`Prior`] with its `statrs` distribution built and checked.
#[derive(Debug, Clone)]
pub(crate) enum Density {
    Normal(Normal),
    Exponential(Exp),
    Uniform(Uniform),
    Beta(Beta),
}

impl Density {
    pub(crate) fn ln_pdf(&self, x: f64) -> f64 {
        match self {
            Density::Normal(d) => d.ln_pdf(x),
            Density::Exponential(d) => d.ln_pdf(x),
            Density::Uniform(d) => d.ln_pdf(x),
            Density::Beta(d) => d.ln_pdf(x),
        }
    }
}

/// A prior compiled for one parameter slot: density plus transform.
#[derive(Debug, Clone)]
pub(crate) struct SlotPrior {
    pub(crate) density: Density,
    pub(crate) transform: Transform,
}

impl SlotPrior {
    /// Log density of the constrained value at `u`, including the Jacobian.
    pub(crate) fn log_density(&self, u: f64) -> f64 {
        let x = self.transform.forward(u);
        self.density.ln_pdf(x) + self.transform.log_jacobian(u)
    }
}

impl Prior {
    /// Support as `(lower, upper)`.
    pub fn support(&self) -> (f64, f64) {
        match *self {
            Prior::Normal { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Prior::Exponential { .. } => (0.0, f64::INFINITY),
            Prior::Uniform { lower, upper } => (lower, upper),
            Prior::Beta { .. } => (0.0, 1.0),
        }
    }

    pub fn transform(&self) -> Transform {
        match self.support() {
            (l, u) if l.is_infinite() && u.is_infinite() => Transform::Identity,
            (l, u) if l == 0.0 && u.is_infinite() => Transform::Log,
            (lower, upper) => Transform::Interval { lower, upper },
        }
    }

    pub(crate) fn density(&self, slot: &'static str) -> Result<Density> {
        let invalid = |reason: String| ModelError::InvalidPrior { slot, reason };
        Ok(match *self {
            Prior::Normal { mu, sigma } => {
                Density::Normal(Normal::new(mu, sigma).map_err(|e| invalid(format!("{:?}", e)))?)
            }
            Prior::Exponential { rate } => {
                Density::Exponential(Exp::new(rate).map_err(|e| invalid(format!("{:?}", e)))?)
            }
            Prior::Uniform { lower, upper } => {
                if !(lower.is_finite() && upper.is_finite()) {
                    return Err(invalid("uniform bounds must be finite".into()));
                }
                Density::Uniform(Uniform::new(lower, upper).map_err(|e| invalid(format!("{:?}", e)))?)
            }
            Prior::Beta { alpha, beta } => {
                Density::Beta(Beta::new(alpha, beta).map_err(|e| invalid(format!("{:?}", e)))?)
            }
        })
    }

    /// Build the slot prior, requiring its support to lie within
    /// `[lower, upper]`.
    pub(crate) fn compile(&self, slot: &'static str, lower: f64, upper: f64) -> Result<SlotPrior> {
        let density = self.density(slot)?;
        let (l, u) = self.support();
        if l < lower || u > upper {
            return Err(ModelError::InvalidPrior {
                slot,
                reason: format!("support [{}, {}] exceeds allowed range [{}, {}]", l, u, lower, upper),
            });
        }
        Ok(SlotPrior {
            density,
            transform: self.transform(),
        })
    }
}

/// Priors for every hyperparameter of the family.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct PriorConfig {
    /// Pooled intercept.
    pub intercept: Prior,
    /// Mean of the varying intercepts.
    pub intercept_bar: Prior,
    /// Standard deviation of the varying intercepts.
    pub intercept_sigma: Prior,
    /// Mean of the coefficients.
    pub betas_bar: Prior,
    /// Standard deviation of the coefficients.
    pub betas_sigma: Prior,
    /// CAR spatial correlation, in (0, 1).
    pub alpha: Prior,
    /// CAR standard deviation; precision is `1 / sigma_phi^2`.
    pub sigma_phi: Prior,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            intercept: Prior::Normal { mu: 0.0, sigma: 100.0 },
            intercept_bar: Prior::Normal { mu: 0.0, sigma: 1.5 },
            intercept_sigma: Prior::Exponential { rate: 1.0 },
            betas_bar: Prior::Normal { mu: 0.0, sigma: 1.5 },
            betas_sigma: Prior::Exponential { rate: 1.0 },
            alpha: Prior::Beta { alpha: 5.0, beta: 1.0 },
            sigma_phi: Prior::Uniform { lower: 0.0, upper: 20.0 },
        }
    }
}

/// Compiled [`PriorConfig`].
#[derive(Debug, Clone)]
pub(crate) struct CompiledPriors {
    pub(crate) intercept: SlotPrior,
    pub(crate) intercept_bar: SlotPrior,
    pub(crate) intercept_sigma: SlotPrior,
    pub(crate) betas_bar: SlotPrior,
    pub(crate) betas_sigma: SlotPrior,
    pub(crate) alpha: SlotPrior,
    pub(crate) sigma_phi: SlotPrior,
}

impl PriorConfig {
    pub(crate) fn compile(&self) -> Result<CompiledPriors> {
        let inf = f64::INFINITY;
        Ok(CompiledPriors {
            intercept: self.intercept.compile("intercept", -inf, inf)?,
            intercept_bar: self.intercept_bar.compile("intercept_bar", -inf, inf)?,
            intercept_sigma: self.intercept_sigma.compile("intercept_sigma", 0.0, inf)?,
            betas_bar: self.betas_bar.compile("betas_bar", -inf, inf)?,
            betas_sigma: self.betas_sigma.compile("betas_sigma", 0.0, inf)?,
            alpha: self.alpha.compile("alpha", 0.0, 1.0)?,
            sigma_phi: self.sigma_phi.compile("sigma_phi", 0.0, inf)?,
        })
    }

    /// Check every prior is well formed and fits its slot.
    pub fn validate(&self) -> Result<()> {
        self.compile().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transforms_invert() {
        let transforms = [
            Transform::Identity,
            Transform::Log,
            Transform::Interval { lower: 0.0, upper: 20.0 },
            Transform::Interval { lower: -1.0, upper: 1.0 },
        ];
        for t in transforms {
            for u in [-3.0, -0.2, 0.0, 1.7, 4.0] {
                assert_relative_eq!(t.inverse(t.forward(u)), u, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_log_jacobian_matches_numeric_derivative() {
        let t = Transform::Interval { lower: 0.0, upper: 20.0 };
        let h = 1e-6;
        for u in [-2.0, 0.0, 0.5, 3.0] {
            let numeric = ((t.forward(u + h) - t.forward(u - h)) / (2.0 * h)).ln();
            assert_relative_eq!(t.log_jacobian(u), numeric, epsilon = 1e-6);
        }
        assert_relative_eq!(Transform::Log.log_jacobian(0.3), 0.3);
    }

    #[test]
    fn test_transform_chosen_from_support() {
        assert_eq!(Prior::Normal { mu: 0.0, sigma: 1.0 }.transform(), Transform::Identity);
        assert_eq!(Prior::Exponential { rate: 1.0 }.transform(), Transform::Log);
        assert_eq!(
            Prior::Beta { alpha: 5.0, beta: 1.0 }.transform(),
            Transform::Interval { lower: 0.0, upper: 1.0 }
        );
    }

    #[test]
    fn test_defaults_compile() {
        PriorConfig::default().validate().unwrap();
    }

    #[test]
    fn test_invalid_parameters() {
        let bad = Prior::Normal { mu: 0.0, sigma: -1.0 };
        assert!(matches!(bad.compile("x", f64::NEG_INFINITY, f64::INFINITY), Err(ModelError::InvalidPrior { .. })));
    }

    #[test]
    fn test_support_checked_against_slot() {
        let mut config = PriorConfig::default();
        config.intercept_sigma = Prior::Normal { mu: 0.0, sigma: 1.0 };
        assert!(matches!(
            config.validate(),
            Err(ModelError::InvalidPrior { slot: "intercept_sigma", .. })
        ));

        let mut config = PriorConfig::default();
        config.alpha = Prior::Uniform { lower: 0.0, upper: 2.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slot_density_includes_jacobian() {
        let slot = Prior::Exponential { rate: 2.0 }.compile("s", 0.0, f64::INFINITY).unwrap();
        // x = e^u; ln p(x) = ln 2 - 2x; plus u
        let u: f64 = 0.4;
        let expected = 2f64.ln() - 2.0 * u.exp() + u;
        assert_relative_eq!(slot.log_density(u), expected, epsilon = 1e-12);
    }
}
