//! Covariate selection, log transform and standardization.

use birdmap_core::{FeatureIdx, Idx, IdxVec, ObsIdx};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::covariates::{Covariate, Percentile};
use crate::land_cover::LandCover;
use crate::table::PreparedTable;
use crate::{FeatureError, Result};

/// Name of the constant column prepended when `intercept` is set.
pub const INTERCEPT_COLUMN: &str = "intercept";

/// Which covariates enter the design matrix and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScalingSpec {
    /// Covariate columns, in design order.
    pub columns: Vec<Covariate>,
    /// Columns transformed with `ln(x + 1)` before standardization.
    pub log_columns: Vec<Covariate>,
    /// Prepend a column of ones, left out of log and standardization.
    pub intercept: bool,
}

impl Default for ScalingSpec {
    fn default() -> Self {
        let land_cover = [
            LandCover::OpenShrubland,
            LandCover::WoodySavanna,
            LandCover::Savanna,
            LandCover::Grassland,
            LandCover::Barren,
        ]
        .map(Covariate::LandCover);

        let mut columns = vec![
            Covariate::PopulationDensity,
            Covariate::Elevation(Percentile::P50),
            Covariate::LstDay(Percentile::P95),
            Covariate::LstNight(Percentile::P5),
        ];
        columns.extend(land_cover);

        let mut log_columns = vec![Covariate::PopulationDensity];
        log_columns.extend(land_cover);

        Self {
            columns,
            log_columns,
            intercept: false,
        }
    }
}

impl ScalingSpec {
    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() && !self.intercept {
            return Err(FeatureError::InvalidScaling("no columns selected".into()));
        }
        for (i, c) in self.columns.iter().enumerate() {
            if self.columns[..i].contains(c) {
                return Err(FeatureError::InvalidScaling(format!("duplicate column {}", c)));
            }
        }
        if let Some(c) = self.log_columns.iter().find(|c| !self.columns.contains(c)) {
            return Err(FeatureError::InvalidScaling(format!(
                "log column {} is not a selected column",
                c
            )));
        }
        Ok(())
    }

    fn is_log(&self, c: Covariate) -> bool {
        self.log_columns.contains(&c)
    }
}

/// Standardized covariates, one row per table row.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    columns: IdxVec<FeatureIdx, String>,
    values: DMatrix<f64>,
}

impl DesignMatrix {
    pub fn new(columns: Vec<String>, values: DMatrix<f64>) -> Self {
        Self {
            columns: IdxVec::from_vec(columns),
            values,
        }
    }

    pub fn columns(&self) -> &IdxVec<FeatureIdx, String> {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    pub fn get(&self, row: ObsIdx, feature: FeatureIdx) -> f64 {
        self.values[(row.index(), feature.index())]
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    /// First non-finite entry, if any.
    pub fn find_non_finite(&self) -> Option<(ObsIdx, FeatureIdx, f64)> {
        for r in 0..self.values.nrows() {
            for c in 0..self.values.ncols() {
                let v = self.values[(r, c)];
                if !v.is_finite() {
                    return Some((ObsIdx::new(r), FeatureIdx::new(c), v));
                }
            }
        }
        None
    }
}

/// Parameters of a fitted [`ScalingSpec`]: per-column log flag, mean and
/// scale, in design order (intercept excluded).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaling {
    pub columns: Vec<Covariate>,
    pub log: Vec<bool>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
    pub intercept: bool,
}

impl FittedScaling {
    fn offset(&self) -> usize {
        usize::from(self.intercept)
    }

    /// Names of the design columns.
    pub fn column_names(&self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.columns.len() + self.offset());
        if self.intercept {
            names.push(INTERCEPT_COLUMN.to_string());
        }
        names.extend(self.columns.iter().map(|c| c.column_name()));
        names
    }

    /// Map raw covariate values (one column per selected covariate) to the
    /// design scale: log where flagged, then `(x - mean) / scale`.
    pub fn transform(&self, raw: &DMatrix<f64>) -> DMatrix<f64> {
        let off = self.offset();
        let mut out = DMatrix::from_element(raw.nrows(), raw.ncols() + off, 1.0);
        for c in 0..raw.ncols() {
            for r in 0..raw.nrows() {
                let mut v = raw[(r, c)];
                if self.log[c] {
                    v = v.ln_1p();
                }
                out[(r, c + off)] = (v - self.means[c]) / self.scales[c];
            }
        }
        out
    }

    /// Undo [`FittedScaling::transform`], dropping the intercept column.
    pub fn inverse_transform(&self, design: &DMatrix<f64>) -> DMatrix<f64> {
        let off = self.offset();
        let n = design.ncols().saturating_sub(off);
        let mut out = DMatrix::zeros(design.nrows(), n);
        for c in 0..n {
            for r in 0..design.nrows() {
                let mut v = design[(r, c + off)] * self.scales[c] + self.means[c];
                if self.log[c] {
                    v = v.exp_m1();
                }
                out[(r, c)] = v;
            }
        }
        out
    }
}

/// Select, log-transform and standardize the covariates of `table`.
///
/// Means and (population) standard deviations are computed over the table's
/// rows. A constant column gets scale 1, so it maps to all zeros.
///
/// # Errors
///
/// - [`FeatureError::InvalidScaling`] for an inconsistent spec
/// - [`FeatureError::NonFiniteCovariate`] for NaN or infinite raw values
/// - [`FeatureError::NegativeLogInput`] for negative values in a log column
pub fn fit_scaling(table: &PreparedTable, spec: &ScalingSpec) -> Result<(DesignMatrix, FittedScaling)> {
    spec.validate()?;
    let n = table.len();
    let k = spec.columns.len();

    let mut raw = DMatrix::zeros(n, k);
    for (c, &cov) in spec.columns.iter().enumerate() {
        let log = spec.is_log(cov);
        for (obs, row) in table.rows().iter_enumerated() {
            let v = row.covariates.get(cov);
            if !v.is_finite() {
                return Err(FeatureError::NonFiniteCovariate {
                    cell: row.cell.clone(),
                    covariate: cov.column_name(),
                    value: v,
                });
            }
            if log && v < 0.0 {
                return Err(FeatureError::NegativeLogInput {
                    cell: row.cell.clone(),
                    covariate: cov.column_name(),
                    value: v,
                });
            }
            raw[(obs.index(), c)] = v;
        }
    }

    let mut means = Vec::with_capacity(k);
    let mut scales = Vec::with_capacity(k);
    let mut log = Vec::with_capacity(k);
    for (c, &cov) in spec.columns.iter().enumerate() {
        let is_log = spec.is_log(cov);
        let column: Vec<f64> = raw
            .column(c)
            .iter()
            .map(|&v| if is_log { v.ln_1p() } else { v })
            .collect();
        let (mean, std) = mean_std(&column);
        let scale = if std > 0.0 {
            std
        } else {
            if n > 0 {
                warn!(column = %cov, "zero variance covariate, leaving unscaled");
            }
            1.0
        };
        means.push(mean);
        scales.push(scale);
        log.push(is_log);
    }

    let fitted = FittedScaling {
        columns: spec.columns.clone(),
        log,
        means,
        scales,
        intercept: spec.intercept,
    };
    let values = fitted.transform(&raw);
    debug!(rows = n, features = values.ncols(), "scaled design matrix");
    Ok((DesignMatrix::new(fitted.column_names(), values), fitted))
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
