//! Inference engines and the reference sampler.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::builder::SpatialModel;
use crate::{ModelError, Result};

/// Iterations between step-size adaptations during tuning.
const ADAPT_WINDOW: usize = 50;
/// Iterations between full recomputations of the cached density.
const REFRESH_EVERY: usize = 200;
const MIN_STEP: f64 = 1e-4;
const MAX_STEP: f64 = 50.0;
const INIT_JITTER: f64 = 0.1;

/// Anything that can draw from a [`SpatialModel`]'s posterior.
pub trait InferenceEngine {
    fn sample(&self, model: &SpatialModel) -> Result<Trace>;
}

/// Settings for [`MetropolisSampler`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct SamplerConfig {
    /// Independent chains, run in parallel.
    pub chains: usize,
    /// Warm-up iterations per chain, discarded.
    pub tune: usize,
    /// Kept iterations per chain.
    pub draws: usize,
    /// Chain `c` uses seed `seed + c`.
    pub seed: u64,
    /// Acceptance rate the step sizes adapt towards.
    pub target_accept: f64,
    pub initial_step: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 4,
            tune: 1000,
            draws: 1000,
            seed: 42,
            target_accept: 0.44,
            initial_step: 0.5,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(ModelError::InvalidSampler("chains must be at least 1".into()));
        }
        if self.draws == 0 {
            return Err(ModelError::InvalidSampler("draws must be at least 1".into()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(ModelError::InvalidSampler(format!(
                "target_accept {} must be in (0, 1)",
                self.target_accept
            )));
        }
        if !(self.initial_step.is_finite() && self.initial_step > 0.0) {
            return Err(ModelError::InvalidSampler(format!(
                "initial_step {} must be positive",
                self.initial_step
            )));
        }
        Ok(())
    }
}

/// Draws of one chain on the unconstrained scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTrace {
    pub chain: usize,
    pub draws: Vec<Vec<f64>>,
    /// Fraction of accepted proposals after tuning.
    pub acceptance_rate: f64,
}

/// Posterior draws from every chain, ordered by chain id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trace {
    pub chains: Vec<ChainTrace>,
}

impl Trace {
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Draws across all chains.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws.len()).sum()
    }

    /// Every draw, chain by chain.
    pub fn iter_draws(&self) -> impl Iterator<Item = &[f64]> + '_ {
        self.chains.iter().flat_map(|c| c.draws.iter().map(Vec::as_slice))
    }

    pub fn mean_acceptance_rate(&self) -> f64 {
        if self.chains.is_empty() {
            return 0.0;
        }
        self.chains.iter().map(|c| c.acceptance_rate).sum::<f64>() / self.chains.len() as f64
    }
}

/// Component-wise adaptive random-walk Metropolis.
///
/// Each iteration proposes a Gaussian move for every coordinate in turn.
/// During tuning each coordinate's step size is scaled every
/// [`ADAPT_WINDOW`] iterations towards `target_accept`; steps are frozen for
/// the kept draws. Chains start near the model's initial point and run on the
/// rayon pool, each with its own seeded RNG, so a fixed seed reproduces the
/// trace exactly.
#[derive(Debug, Clone, Default)]
pub struct MetropolisSampler {
    config: SamplerConfig,
}

impl MetropolisSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    fn run_chain(&self, model: &SpatialModel, chain: usize) -> Result<ChainTrace> {
        let cfg = &self.config;
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed.wrapping_add(chain as u64));
        let dim = model.dim();

        let mut theta = model.initial_point();
        for v in theta.iter_mut() {
            *v += rng.gen_range(-INIT_JITTER..INIT_JITTER);
        }
        let mut state = model.state(theta)?;
        if !state.log_prob().is_finite() {
            warn!(chain, "jittered start has non-finite density, using the initial point");
            state = model.state(model.initial_point())?;
        }

        let mut steps = vec![cfg.initial_step; dim];
        let mut window_accepts = vec![0u32; dim];
        let mut accepted = 0u64;
        let mut draws = Vec::with_capacity(cfg.draws);

        for iter in 0..cfg.tune + cfg.draws {
            let tuning = iter < cfg.tune;
            for k in 0..dim {
                let z: f64 = rng.sample(StandardNormal);
                let proposal = state.theta()[k] + steps[k] * z;
                let log_u = rng.gen::<f64>().ln();
                if state.propose(k, proposal, log_u) {
                    if tuning {
                        window_accepts[k] += 1;
                    } else {
                        accepted += 1;
                    }
                }
            }

            if tuning && (iter + 1) % ADAPT_WINDOW == 0 {
                for (step, hits) in steps.iter_mut().zip(window_accepts.iter_mut()) {
                    let rate = *hits as f64 / ADAPT_WINDOW as f64;
                    *step = (*step * (2.0 * (rate - cfg.target_accept)).exp()).clamp(MIN_STEP, MAX_STEP);
                    *hits = 0;
                }
            }
            if (iter + 1) % REFRESH_EVERY == 0 {
                state.refresh();
            }
            if !tuning {
                draws.push(state.theta().to_vec());
            }
        }

        let proposals = (cfg.draws * dim).max(1) as f64;
        let acceptance_rate = accepted as f64 / proposals;
        debug!(chain, acceptance_rate, log_prob = state.log_prob(), "chain finished");

        Ok(ChainTrace {
            chain,
            draws,
            acceptance_rate,
        })
    }
}

impl InferenceEngine for MetropolisSampler {
    fn sample(&self, model: &SpatialModel) -> Result<Trace> {
        self.config.validate()?;
        info!(
            model = %model.spec(),
            dim = model.dim(),
            chains = self.config.chains,
            tune = self.config.tune,
            draws = self.config.draws,
            "sampling"
        );

        let mut chains = (0..self.config.chains)
            .into_par_iter()
            .map(|chain| self.run_chain(model, chain))
            .collect::<Result<Vec<_>>>()?;
        chains.sort_by_key(|c| c.chain);

        let trace = Trace { chains };
        info!(
            draws = trace.total_draws(),
            acceptance_rate = trace.mean_acceptance_rate(),
            "sampling finished"
        );
        Ok(trace)
    }
}
