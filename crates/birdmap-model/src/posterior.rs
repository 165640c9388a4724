//! Posterior summaries and posterior predictive draws.

use birdmap_core::{AdjIdx, CellKey, Idx, IdxVec, ObsIdx};
use birdmap_features::PreparedTable;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use rayon::prelude::*;
use tracing::debug;

use crate::builder::SpatialModel;
use crate::inference::Trace;
use crate::{ModelError, Result};

/// Summary statistics of one scalar model element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SummaryRow {
    /// Element name, e.g. `phi[3]` or `betas[1,2]`.
    pub name: String,
    pub mean: f64,
    /// Sample standard deviation.
    pub sd: f64,
    pub hdi_lower: f64,
    pub hdi_upper: f64,
}

/// Narrowest interval containing `prob` of a sorted sample.
pub fn hdi(sorted: &[f64], prob: f64) -> (f64, f64) {
    let n = sorted.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let inc = ((prob * n as f64).floor() as usize).min(n - 1);
    let (mut best, mut width) = (0, f64::INFINITY);
    for i in 0..n - inc {
        let w = sorted[i + inc] - sorted[i];
        if w < width {
            best = i;
            width = w;
        }
    }
    (sorted[best], sorted[best + inc])
}

fn mean_sd(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

/// Mean, standard deviation and `hdi_prob` highest-density interval of every
/// constrained element, pooled over chains.
pub fn summarize(model: &SpatialModel, trace: &Trace, hdi_prob: f64) -> Result<Vec<SummaryRow>> {
    if !(hdi_prob > 0.0 && hdi_prob <= 1.0) {
        return Err(ModelError::InvalidProbability(hdi_prob));
    }
    if trace.total_draws() == 0 {
        return Err(ModelError::EmptyTrace);
    }

    let names = model.element_names();
    let mut columns = vec![Vec::with_capacity(trace.total_draws()); names.len()];
    for theta in trace.iter_draws() {
        for (column, v) in columns.iter_mut().zip(model.constrain(theta)?) {
            column.push(v);
        }
    }

    let rows = names
        .into_par_iter()
        .zip(columns.into_par_iter())
        .map(|(name, mut values)| {
            let (mean, sd) = mean_sd(&values);
            values.sort_by(f64::total_cmp);
            let (hdi_lower, hdi_upper) = hdi(&values, hdi_prob);
            SummaryRow {
                name,
                mean,
                sd,
                hdi_lower,
                hdi_upper,
            }
        })
        .collect();
    Ok(rows)
}

/// Simulated counts, one vector of rows per posterior draw.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorPredictive {
    pub draws: Vec<IdxVec<ObsIdx, u64>>,
}

impl PosteriorPredictive {
    pub fn n_draws(&self) -> usize {
        self.draws.len()
    }

    /// Mean simulated count of every row.
    pub fn means(&self) -> IdxVec<ObsIdx, f64> {
        let n_rows = self.draws.first().map_or(0, |d| d.len());
        let n = self.draws.len().max(1) as f64;
        let mut sums = vec![0.0; n_rows];
        for draw in &self.draws {
            for (sum, &y) in sums.iter_mut().zip(draw.iter()) {
                *sum += y as f64;
            }
        }
        sums.into_iter().map(|s| s / n).collect()
    }
}

/// Draw `y` for every row from each posterior draw's `mu`, masked rows
/// included.
///
/// Draw `d` (counted across chains in order) uses seed `seed + d`, so the
/// result does not depend on scheduling.
pub fn posterior_predictive(model: &SpatialModel, trace: &Trace, seed: u64) -> Result<PosteriorPredictive> {
    if trace.total_draws() == 0 {
        return Err(ModelError::EmptyTrace);
    }
    let thetas: Vec<&[f64]> = trace.iter_draws().collect();
    let draws = thetas
        .into_par_iter()
        .enumerate()
        .map(|(d, theta)| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(d as u64));
            let mu = model.mu(theta)?;
            mu.iter_enumerated()
                .map(|(row, &rate)| {
                    sample_count(rate, &mut rng).ok_or_else(|| ModelError::NonFiniteRate {
                        row: row.index(),
                        value: rate,
                    })
                })
                .collect::<Result<IdxVec<ObsIdx, u64>>>()
        })
        .collect::<Result<Vec<_>>>()?;
    debug!(draws = draws.len(), rows = model.n_obs(), "posterior predictive drawn");
    Ok(PosteriorPredictive { draws })
}

fn sample_count(rate: f64, rng: &mut ChaCha8Rng) -> Option<u64> {
    if !rate.is_finite() || rate < 0.0 {
        return None;
    }
    if rate == 0.0 {
        return Some(0);
    }
    let poisson = Poisson::new(rate).ok()?;
    Some(poisson.sample(rng) as u64)
}

/// A table row with its posterior predicted count.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PredictionRow {
    pub species: String,
    pub cell: CellKey,
    pub adj_idx: AdjIdx,
    pub y: Option<u32>,
    /// Mean posterior predictive count.
    pub pred: f64,
    /// `ln(pred + 1)`
    pub log_pred: f64,
}

/// Attach predicted means to the table by row position.
pub fn prediction_rows(table: &PreparedTable, predictive: &PosteriorPredictive) -> Result<Vec<PredictionRow>> {
    let means = predictive.means();
    if means.len() != table.len() {
        return Err(ModelError::RowCountMismatch {
            table: table.len(),
            design: means.len(),
        });
    }
    Ok(table
        .rows()
        .iter()
        .zip(means.iter())
        .map(|(row, &pred)| PredictionRow {
            species: row.species.clone(),
            cell: row.cell.clone(),
            adj_idx: row.adj_idx,
            y: row.y,
            pred,
            log_pred: pred.ln_1p(),
        })
        .collect())
}
