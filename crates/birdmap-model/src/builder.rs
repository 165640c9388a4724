//! Build one member of the model family over a prepared table.

use std::f64::consts::PI;
use std::fmt;

use birdmap_core::{FeatureIdx, Idx, IdxVec, ObsIdx, SpeciesIdx};
use birdmap_features::{DesignMatrix, PreparedTable};
use birdmap_grid::AdjacencyMatrix;
use nalgebra::DMatrix;
use statrs::function::factorial::ln_factorial;
use tracing::{info, warn};

use crate::car::CarPrior;
use crate::priors::{CompiledPriors, PriorConfig, SlotPrior};
use crate::spec::{CovariateKind, InterceptKind, ModelSpec};
use crate::{ModelError, Result};

// ============================================================================
// Options
// ============================================================================

/// How rows without a recorded count enter the likelihood.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum MissingCounts {
    /// Unobserved rows are left out of the likelihood. Their counts are
    /// latent and still receive posterior predictive draws.
    #[default]
    Masked,
    /// No record means an observed count of zero.
    Zero,
}

/// Everything that parameterises the family besides the variant itself.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct ModelOptions {
    pub priors: PriorConfig,
    pub missing_counts: MissingCounts,
}

// ============================================================================
// Coordinates and variables
// ============================================================================

/// A named coordinate axis of the model's variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Species,
    Features,
    Adj,
    Obs,
}

impl Dim {
    pub fn name(&self) -> &'static str {
        match self {
            Dim::Species => "species_idx",
            Dim::Features => "features_idx",
            Dim::Adj => "adj_idx",
            Dim::Obs => "obs_idx",
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Labels of every coordinate axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Coords {
    pub species: IdxVec<SpeciesIdx, String>,
    pub features: IdxVec<FeatureIdx, String>,
    pub n_cells: usize,
    pub n_obs: usize,
}

impl Coords {
    pub fn size(&self, dim: Dim) -> usize {
        match dim {
            Dim::Species => self.species.len(),
            Dim::Features => self.features.len(),
            Dim::Adj => self.n_cells,
            Dim::Obs => self.n_obs,
        }
    }
}

/// Axes of a variable. Variables are scalars, vectors or matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dims {
    Scalar,
    Vector(Dim),
    Matrix(Dim, Dim),
}

impl Dims {
    pub fn to_vec(self) -> Vec<Dim> {
        match self {
            Dims::Scalar => vec![],
            Dims::Vector(d) => vec![d],
            Dims::Matrix(r, c) => vec![r, c],
        }
    }
}

/// Sizes along each of a variable's [`Dims`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl Shape {
    pub fn to_vec(self) -> Vec<usize> {
        match self {
            Shape::Scalar => vec![],
            Shape::Vector(n) => vec![n],
            Shape::Matrix(r, c) => vec![r, c],
        }
    }
}

/// A named, dimension-tagged model variable on the constrained scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: &'static str,
    pub dims: Dims,
    pub shape: Shape,
}

impl Variable {
    fn new(name: &'static str, dims: Dims, coords: &Coords) -> Self {
        let shape = match dims {
            Dims::Scalar => Shape::Scalar,
            Dims::Vector(d) => Shape::Vector(coords.size(d)),
            Dims::Matrix(r, c) => Shape::Matrix(coords.size(r), coords.size(c)),
        };
        Self { name, dims, shape }
    }

    /// Number of scalar elements.
    pub fn size(&self) -> usize {
        match self.shape {
            Shape::Scalar => 1,
            Shape::Vector(n) => n,
            Shape::Matrix(r, c) => r * c,
        }
    }

    /// Element names in row-major order: `alpha`, `phi[3]`, `betas[1,2]`.
    pub fn element_names(&self) -> Vec<String> {
        match self.shape {
            Shape::Scalar => vec![self.name.to_string()],
            Shape::Vector(n) => (0..n).map(|i| format!("{}[{}]", self.name, i)).collect(),
            Shape::Matrix(rows, cols) => (0..rows)
                .flat_map(|i| (0..cols).map(move |j| (i, j)))
                .map(|(i, j)| format!("{}[{},{}]", self.name, i, j))
                .collect(),
        }
    }
}

// ============================================================================
// Parameter layout
// ============================================================================

/// One coordinate of the unconstrained parameter vector.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Intercept,
    InterceptBar,
    InterceptSigma,
    /// Standardised offset of one species' intercept.
    InterceptZ(usize),
    BetasBar,
    BetasSigma,
    /// Standardised offset of one coefficient.
    BetasZ { group: usize, feature: usize },
    Alpha,
    SigmaPhi,
    Phi(usize),
}

#[derive(Debug, Clone, Default)]
struct Layout {
    slots: Vec<Slot>,
    intercept: Option<usize>,
    intercept_bar: Option<usize>,
    intercept_sigma: Option<usize>,
    intercept_z: Option<usize>,
    betas_bar: Option<usize>,
    betas_sigma: Option<usize>,
    betas_z: Option<usize>,
    /// Coefficient vectors: 1 when pooled, one per species when varying.
    betas_groups: usize,
    alpha: Option<usize>,
    sigma_phi: Option<usize>,
    phi: Option<usize>,
}

impl Layout {
    fn new(spec: ModelSpec, n_species: usize, n_features: usize, n_cells: usize) -> Self {
        let mut layout = Layout::default();
        let push = |slots: &mut Vec<Slot>, slot: Slot| {
            slots.push(slot);
            slots.len() - 1
        };
        let mut slots = Vec::new();

        match spec.intercept {
            InterceptKind::Pooled => layout.intercept = Some(push(&mut slots, Slot::Intercept)),
            InterceptKind::Varying => {
                layout.intercept_bar = Some(push(&mut slots, Slot::InterceptBar));
                layout.intercept_sigma = Some(push(&mut slots, Slot::InterceptSigma));
                layout.intercept_z = Some(slots.len());
                for s in 0..n_species {
                    push(&mut slots, Slot::InterceptZ(s));
                }
            }
        }

        if spec.uses_covariates() {
            layout.betas_groups = match spec.covariates {
                CovariateKind::Varying => n_species,
                _ => 1,
            };
            layout.betas_bar = Some(push(&mut slots, Slot::BetasBar));
            layout.betas_sigma = Some(push(&mut slots, Slot::BetasSigma));
            layout.betas_z = Some(slots.len());
            for group in 0..layout.betas_groups {
                for feature in 0..n_features {
                    push(&mut slots, Slot::BetasZ { group, feature });
                }
            }
        }

        if spec.spatial {
            layout.alpha = Some(push(&mut slots, Slot::Alpha));
            layout.sigma_phi = Some(push(&mut slots, Slot::SigmaPhi));
            layout.phi = Some(slots.len());
            for c in 0..n_cells {
                push(&mut slots, Slot::Phi(c));
            }
        }

        layout.slots = slots;
        layout
    }
}

fn std_normal_ln_pdf(z: f64) -> f64 {
    -0.5 * z * z - 0.5 * (2.0 * PI).ln()
}

fn poisson_ln_pmf(y: u32, eta: f64, ln_fact: f64) -> f64 {
    y as f64 * eta - eta.exp() - ln_fact
}

// ============================================================================
// Model
// ============================================================================

/// Constrained parameters needed to evaluate the linear predictor.
struct Params {
    intercepts: Vec<f64>,
    /// Group-major, `betas_groups x n_features`.
    betas: Vec<f64>,
    phi: Vec<f64>,
}

/// A built model: an unnormalised log density over an unconstrained
/// parameter vector, plus the named variables derived from it.
///
/// Varying intercepts and all coefficients are parameterised non-centred
/// (`intercept[s] = intercept_bar + intercept_sigma * z[s]`). Scale and
/// correlation parameters are sampled on the log or logit scale with the
/// Jacobian included.
#[derive(Debug, Clone)]
pub struct SpatialModel {
    spec: ModelSpec,
    missing_counts: MissingCounts,
    priors: CompiledPriors,
    car: Option<CarPrior>,
    coords: Coords,
    layout: Layout,
    variables: Vec<Variable>,
    x: DMatrix<f64>,
    x_row_sums: Vec<f64>,
    species: Vec<usize>,
    cells: Vec<usize>,
    counts: Vec<Option<u32>>,
    ln_factorials: Vec<f64>,
    all_rows: Vec<usize>,
    rows_by_species: Vec<Vec<usize>>,
    rows_by_cell: Vec<Vec<usize>>,
}

/// Build `spec` over `table`.
///
/// `design` must have one row per table row, in the same order. The
/// adjacency matrix must span the table's cell domain. Every variant
/// validates the same inputs, so one table serves the whole family.
///
/// # Errors
///
/// - [`ModelError::InvalidSpec`] / [`ModelError::InvalidPrior`]
/// - [`ModelError::EmptyTable`]
/// - [`ModelError::RowCountMismatch`] if design and table rows differ
/// - [`ModelError::AdjacencyMismatch`] if the matrix size differs from the
///   table's cell count
/// - [`ModelError::IndexOutOfRange`] for a row pointing outside a domain
/// - [`ModelError::NonFiniteCovariate`] for NaN or infinite design values
pub fn build_model(
    spec: ModelSpec,
    table: &PreparedTable,
    design: &DesignMatrix,
    adjacency: &AdjacencyMatrix,
    options: &ModelOptions,
) -> Result<SpatialModel> {
    spec.validate()?;
    let priors = options.priors.compile()?;

    if table.is_empty() {
        return Err(ModelError::EmptyTable);
    }
    if design.n_rows() != table.len() {
        return Err(ModelError::RowCountMismatch {
            table: table.len(),
            design: design.n_rows(),
        });
    }
    if adjacency.n() != table.n_cells() {
        return Err(ModelError::AdjacencyMismatch {
            table_cells: table.n_cells(),
            matrix: adjacency.n(),
        });
    }

    let n_obs = table.len();
    let n_cells = table.n_cells();
    let n_species = table.n_species();

    for (idx, row) in table.rows().iter_enumerated() {
        if row.adj_idx.index() >= n_cells {
            return Err(ModelError::IndexOutOfRange {
                row: idx.index(),
                dim: Dim::Adj.name(),
                index: row.adj_idx.index(),
                size: n_cells,
            });
        }
        if row.species_idx.index() >= n_species {
            return Err(ModelError::IndexOutOfRange {
                row: idx.index(),
                dim: Dim::Species.name(),
                index: row.species_idx.index(),
                size: n_species,
            });
        }
    }

    let n_features = if spec.uses_covariates() {
        if design.n_features() == 0 {
            return Err(ModelError::InvalidSpec(format!(
                "{} needs at least one covariate column",
                spec
            )));
        }
        if let Some((row, feature, value)) = design.find_non_finite() {
            return Err(ModelError::NonFiniteCovariate {
                row: row.index(),
                feature: feature.index(),
                value,
            });
        }
        design.n_features()
    } else {
        0
    };

    let coords = Coords {
        species: table.species().clone(),
        features: if n_features > 0 {
            design.columns().clone()
        } else {
            IdxVec::new()
        },
        n_cells,
        n_obs,
    };

    let species: Vec<usize> = table.rows().iter().map(|r| r.species_idx.index()).collect();
    let cells: Vec<usize> = table.rows().iter().map(|r| r.adj_idx.index()).collect();
    let counts: Vec<Option<u32>> = table
        .rows()
        .iter()
        .map(|r| match options.missing_counts {
            MissingCounts::Masked => r.y,
            MissingCounts::Zero => Some(r.y.unwrap_or(0)),
        })
        .collect();
    let ln_factorials = counts.iter().map(|y| y.map_or(0.0, |y| ln_factorial(y as u64))).collect();

    let mut rows_by_species = vec![Vec::new(); n_species];
    let mut rows_by_cell = vec![Vec::new(); n_cells];
    for i in 0..n_obs {
        rows_by_species[species[i]].push(i);
        rows_by_cell[cells[i]].push(i);
    }

    let x = if n_features > 0 {
        design.values().clone()
    } else {
        DMatrix::zeros(n_obs, 0)
    };
    let x_row_sums = (0..n_obs).map(|i| x.row(i).sum()).collect();

    let observed = counts.iter().filter(|y| y.is_some()).count();
    if observed == 0 {
        warn!(model = %spec, "no observed counts; the posterior is the prior");
    }

    let car = spec.spatial.then(|| CarPrior::new(adjacency));
    let layout = Layout::new(spec, n_species, n_features, n_cells);
    let variables = model_variables(spec, &coords);

    info!(
        model = %spec,
        rows = n_obs,
        observed,
        species = n_species,
        features = n_features,
        cells = n_cells,
        dim = layout.slots.len(),
        "model built"
    );

    Ok(SpatialModel {
        spec,
        missing_counts: options.missing_counts,
        priors,
        car,
        coords,
        layout,
        variables,
        x,
        x_row_sums,
        species,
        cells,
        counts,
        ln_factorials,
        all_rows: (0..n_obs).collect(),
        rows_by_species,
        rows_by_cell,
    })
}

fn model_variables(spec: ModelSpec, coords: &Coords) -> Vec<Variable> {
    let mut vars = Vec::new();
    match spec.intercept {
        InterceptKind::Pooled => vars.push(Variable::new("intercept", Dims::Scalar, coords)),
        InterceptKind::Varying => {
            vars.push(Variable::new("intercept_bar", Dims::Scalar, coords));
            vars.push(Variable::new("intercept_sigma", Dims::Scalar, coords));
            vars.push(Variable::new("intercept", Dims::Vector(Dim::Species), coords));
        }
    }
    match spec.covariates {
        CovariateKind::None => {}
        CovariateKind::Pooled => {
            vars.push(Variable::new("betas_bar", Dims::Scalar, coords));
            vars.push(Variable::new("betas_sigma", Dims::Scalar, coords));
            vars.push(Variable::new("betas", Dims::Vector(Dim::Features), coords));
        }
        CovariateKind::Varying => {
            vars.push(Variable::new("betas_bar", Dims::Scalar, coords));
            vars.push(Variable::new("betas_sigma", Dims::Scalar, coords));
            vars.push(Variable::new("betas", Dims::Matrix(Dim::Species, Dim::Features), coords));
        }
    }
    if spec.spatial {
        vars.push(Variable::new("alpha", Dims::Scalar, coords));
        vars.push(Variable::new("sigma_phi", Dims::Scalar, coords));
        vars.push(Variable::new("phi", Dims::Vector(Dim::Adj), coords));
    }
    vars.push(Variable::new("mu", Dims::Vector(Dim::Obs), coords));
    vars
}

impl SpatialModel {
    pub fn spec(&self) -> ModelSpec {
        self.spec
    }

    pub fn missing_counts(&self) -> MissingCounts {
        self.missing_counts
    }

    /// Length of the unconstrained parameter vector.
    pub fn dim(&self) -> usize {
        self.layout.slots.len()
    }

    /// Variables in the order [`constrain`](Self::constrain) emits them.
    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn coords(&self) -> &Coords {
        &self.coords
    }

    pub fn n_obs(&self) -> usize {
        self.coords.n_obs
    }

    /// Rows that contribute to the likelihood.
    pub fn observed_rows(&self) -> usize {
        self.counts.iter().filter(|y| y.is_some()).count()
    }

    pub fn car(&self) -> Option<&CarPrior> {
        self.car.as_ref()
    }

    /// Scalar element names across all variables, matching
    /// [`constrain`](Self::constrain).
    pub fn element_names(&self) -> Vec<String> {
        self.variables.iter().flat_map(|v| v.element_names()).collect()
    }

    /// The origin of the unconstrained space: every offset and effect at 0,
    /// every scale at 1 and `alpha` at its midpoint.
    pub fn initial_point(&self) -> Vec<f64> {
        vec![0.0; self.dim()]
    }

    fn check_dim(&self, theta: &[f64]) -> Result<()> {
        if theta.len() != self.dim() {
            return Err(ModelError::DimensionMismatch {
                expected: self.dim(),
                got: theta.len(),
            });
        }
        Ok(())
    }

    /// Unnormalised log posterior density at `theta`, Jacobians included.
    pub fn log_prob(&self, theta: &[f64]) -> Result<f64> {
        self.check_dim(theta)?;
        let eta = self.eta(&self.unpack(theta));
        Ok(self.log_prior(theta) + self.log_likelihood(&eta))
    }

    /// Poisson rate of every row.
    pub fn mu(&self, theta: &[f64]) -> Result<IdxVec<ObsIdx, f64>> {
        self.check_dim(theta)?;
        Ok(self.eta(&self.unpack(theta)).into_iter().map(f64::exp).collect())
    }

    /// All variables on the constrained scale, flattened in
    /// [`variables`](Self::variables) order.
    pub fn constrain(&self, theta: &[f64]) -> Result<Vec<f64>> {
        self.check_dim(theta)?;
        let p = &self.priors;
        let l = &self.layout;
        let params = self.unpack(theta);
        let mut out = Vec::new();

        match self.spec.intercept {
            InterceptKind::Pooled => out.push(params.intercepts[0]),
            InterceptKind::Varying => {
                out.push(value(theta, l.intercept_bar, &p.intercept_bar));
                out.push(value(theta, l.intercept_sigma, &p.intercept_sigma));
                out.extend_from_slice(&params.intercepts);
            }
        }
        if self.spec.uses_covariates() {
            out.push(value(theta, l.betas_bar, &p.betas_bar));
            out.push(value(theta, l.betas_sigma, &p.betas_sigma));
            out.extend_from_slice(&params.betas);
        }
        if self.spec.spatial {
            out.push(value(theta, l.alpha, &p.alpha));
            out.push(value(theta, l.sigma_phi, &p.sigma_phi));
            out.extend_from_slice(&params.phi);
        }
        out.extend(self.eta(&params).into_iter().map(f64::exp));
        Ok(out)
    }

    /// Start incremental evaluation at `theta`.
    pub fn state(&self, theta: Vec<f64>) -> Result<ModelState<'_>> {
        self.check_dim(&theta)?;
        let eta = self.eta(&self.unpack(&theta));
        let log_prob = self.log_prior(&theta) + self.log_likelihood(&eta);
        Ok(ModelState {
            model: self,
            theta,
            eta,
            log_prob,
            shifts: Vec::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------------

    fn intercept_group(&self, row: usize) -> usize {
        match self.spec.intercept {
            InterceptKind::Pooled => 0,
            InterceptKind::Varying => self.species[row],
        }
    }

    fn betas_group(&self, row: usize) -> usize {
        match self.spec.covariates {
            CovariateKind::Varying => self.species[row],
            _ => 0,
        }
    }

    fn betas_rows(&self, group: usize) -> &[usize] {
        match self.spec.covariates {
            CovariateKind::Varying => &self.rows_by_species[group],
            _ => &self.all_rows,
        }
    }

    fn n_features(&self) -> usize {
        self.x.ncols()
    }

    fn phi<'t>(&self, theta: &'t [f64]) -> &'t [f64] {
        match self.layout.phi {
            Some(start) => &theta[start..start + self.coords.n_cells],
            None => &[],
        }
    }

    /// `(alpha, tau)` of the CAR prior.
    fn car_params(&self, theta: &[f64]) -> (f64, f64) {
        let alpha = value(theta, self.layout.alpha, &self.priors.alpha);
        let sigma = value(theta, self.layout.sigma_phi, &self.priors.sigma_phi);
        (alpha, 1.0 / (sigma * sigma))
    }

    fn unpack(&self, theta: &[f64]) -> Params {
        let p = &self.priors;
        let l = &self.layout;

        let intercepts = match self.spec.intercept {
            InterceptKind::Pooled => vec![value(theta, l.intercept, &p.intercept)],
            InterceptKind::Varying => {
                let bar = value(theta, l.intercept_bar, &p.intercept_bar);
                let sigma = value(theta, l.intercept_sigma, &p.intercept_sigma);
                let start = l.intercept_z.unwrap_or(0);
                (0..self.coords.species.len())
                    .map(|s| bar + sigma * theta[start + s])
                    .collect()
            }
        };

        let betas = if self.spec.uses_covariates() {
            let bar = value(theta, l.betas_bar, &p.betas_bar);
            let sigma = value(theta, l.betas_sigma, &p.betas_sigma);
            let start = l.betas_z.unwrap_or(0);
            (0..l.betas_groups * self.n_features())
                .map(|j| bar + sigma * theta[start + j])
                .collect()
        } else {
            Vec::new()
        };

        Params {
            intercepts,
            betas,
            phi: self.phi(theta).to_vec(),
        }
    }

    fn eta(&self, params: &Params) -> Vec<f64> {
        let f = self.n_features();
        (0..self.n_obs())
            .map(|i| {
                let mut eta = params.intercepts[self.intercept_group(i)];
                if f > 0 {
                    let betas = &params.betas[self.betas_group(i) * f..][..f];
                    eta += (0..f).map(|k| self.x[(i, k)] * betas[k]).sum::<f64>();
                }
                if !params.phi.is_empty() {
                    eta += params.phi[self.cells[i]];
                }
                eta
            })
            .collect()
    }

    fn row_log_lik(&self, row: usize, eta: f64) -> f64 {
        match self.counts[row] {
            Some(y) => poisson_ln_pmf(y, eta, self.ln_factorials[row]),
            None => 0.0,
        }
    }

    fn log_likelihood(&self, eta: &[f64]) -> f64 {
        eta.iter().enumerate().map(|(i, &e)| self.row_log_lik(i, e)).sum()
    }

    fn log_prior(&self, theta: &[f64]) -> f64 {
        let p = &self.priors;
        let mut lp: f64 = self
            .layout
            .slots
            .iter()
            .zip(theta)
            .map(|(slot, &u)| match slot {
                Slot::Intercept => p.intercept.log_density(u),
                Slot::InterceptBar => p.intercept_bar.log_density(u),
                Slot::InterceptSigma => p.intercept_sigma.log_density(u),
                Slot::InterceptZ(_) | Slot::BetasZ { .. } => std_normal_ln_pdf(u),
                Slot::BetasBar => p.betas_bar.log_density(u),
                Slot::BetasSigma => p.betas_sigma.log_density(u),
                Slot::Alpha => p.alpha.log_density(u),
                Slot::SigmaPhi => p.sigma_phi.log_density(u),
                Slot::Phi(_) => 0.0,
            })
            .sum();
        if let Some(car) = &self.car {
            let (alpha, tau) = self.car_params(theta);
            lp += car.log_density(self.phi(theta), alpha, tau);
        }
        lp
    }

    /// Change in the log prior when `theta[k]` moves to `new`.
    fn log_prior_delta(&self, theta: &[f64], k: usize, new: f64) -> f64 {
        let p = &self.priors;
        let old = theta[k];
        let slot_delta = |prior: &SlotPrior| prior.log_density(new) - prior.log_density(old);
        match self.layout.slots[k] {
            Slot::Intercept => slot_delta(&p.intercept),
            Slot::InterceptBar => slot_delta(&p.intercept_bar),
            Slot::InterceptSigma => slot_delta(&p.intercept_sigma),
            Slot::BetasBar => slot_delta(&p.betas_bar),
            Slot::BetasSigma => slot_delta(&p.betas_sigma),
            Slot::InterceptZ(_) | Slot::BetasZ { .. } => std_normal_ln_pdf(new) - std_normal_ln_pdf(old),
            Slot::Alpha | Slot::SigmaPhi => {
                let prior = if self.layout.slots[k] == Slot::Alpha {
                    &p.alpha
                } else {
                    &p.sigma_phi
                };
                let mut delta = slot_delta(prior);
                if let Some(car) = &self.car {
                    let (alpha, tau) = self.car_params(theta);
                    let (new_alpha, new_tau) = if self.layout.slots[k] == Slot::Alpha {
                        (p.alpha.transform.forward(new), tau)
                    } else {
                        let sigma = p.sigma_phi.transform.forward(new);
                        (alpha, 1.0 / (sigma * sigma))
                    };
                    let phi = self.phi(theta);
                    delta += car.log_density(phi, new_alpha, new_tau) - car.log_density(phi, alpha, tau);
                }
                delta
            }
            Slot::Phi(c) => match &self.car {
                Some(car) => {
                    let (alpha, tau) = self.car_params(theta);
                    car.log_density_delta(self.phi(theta), c, new, alpha, tau)
                }
                None => 0.0,
            },
        }
    }

    /// Linear predictor changes caused by moving `theta[k]` to `new`.
    fn eta_shifts(&self, theta: &[f64], k: usize, new: f64, out: &mut Vec<(usize, f64)>) {
        let p = &self.priors;
        let l = &self.layout;
        let old = theta[k];
        let moved = |prior: &SlotPrior| prior.transform.forward(new) - prior.transform.forward(old);

        match l.slots[k] {
            Slot::Intercept | Slot::InterceptBar => {
                let prior = if l.slots[k] == Slot::Intercept {
                    &p.intercept
                } else {
                    &p.intercept_bar
                };
                let d = moved(prior);
                out.extend(self.all_rows.iter().map(|&i| (i, d)));
            }
            Slot::InterceptSigma => {
                let d = moved(&p.intercept_sigma);
                let start = l.intercept_z.unwrap_or(0);
                out.extend(self.all_rows.iter().map(|&i| (i, d * theta[start + self.species[i]])));
            }
            Slot::InterceptZ(s) => {
                let sigma = value(theta, l.intercept_sigma, &p.intercept_sigma);
                let d = sigma * (new - old);
                out.extend(self.rows_by_species[s].iter().map(|&i| (i, d)));
            }
            Slot::BetasBar => {
                let d = moved(&p.betas_bar);
                out.extend(self.all_rows.iter().map(|&i| (i, d * self.x_row_sums[i])));
            }
            Slot::BetasSigma => {
                let d = moved(&p.betas_sigma);
                let f = self.n_features();
                let start = l.betas_z.unwrap_or(0);
                out.extend(self.all_rows.iter().map(|&i| {
                    let z = &theta[start + self.betas_group(i) * f..][..f];
                    let xz: f64 = (0..f).map(|j| self.x[(i, j)] * z[j]).sum();
                    (i, d * xz)
                }));
            }
            Slot::BetasZ { group, feature } => {
                let sigma = value(theta, l.betas_sigma, &p.betas_sigma);
                let d = sigma * (new - old);
                out.extend(self.betas_rows(group).iter().map(|&i| (i, d * self.x[(i, feature)])));
            }
            Slot::Alpha | Slot::SigmaPhi => {}
            Slot::Phi(c) => {
                let d = new - old;
                out.extend(self.rows_by_cell[c].iter().map(|&i| (i, d)));
            }
        }
    }
}

/// Constrained value of the scalar slot at `idx`.
fn value(theta: &[f64], idx: Option<usize>, prior: &SlotPrior) -> f64 {
    match idx {
        Some(k) => prior.transform.forward(theta[k]),
        None => 0.0,
    }
}

// ============================================================================
// Incremental evaluation
// ============================================================================

/// A point in parameter space with its cached linear predictor, supporting
/// single-coordinate Metropolis updates in time proportional to the rows the
/// coordinate touches.
#[derive(Debug, Clone)]
pub struct ModelState<'m> {
    model: &'m SpatialModel,
    theta: Vec<f64>,
    eta: Vec<f64>,
    log_prob: f64,
    shifts: Vec<(usize, f64)>,
}

impl<'m> ModelState<'m> {
    pub fn theta(&self) -> &[f64] {
        &self.theta
    }

    pub fn into_theta(self) -> Vec<f64> {
        self.theta
    }

    /// Cached log density at the current point.
    pub fn log_prob(&self) -> f64 {
        self.log_prob
    }

    /// Recompute the cache from scratch, discarding accumulated rounding.
    pub fn refresh(&mut self) {
        let model = self.model;
        self.eta = model.eta(&model.unpack(&self.theta));
        self.log_prob = model.log_prior(&self.theta) + model.log_likelihood(&self.eta);
    }

    /// Metropolis step on coordinate `k`: move it to `value` if `log_u` is
    /// below the change in log density. Returns whether the move was taken.
    /// A non-finite change is always rejected.
    pub fn propose(&mut self, k: usize, value: f64, log_u: f64) -> bool {
        let model = self.model;
        self.shifts.clear();
        model.eta_shifts(&self.theta, k, value, &mut self.shifts);

        let mut delta = model.log_prior_delta(&self.theta, k, value);
        for &(i, d) in &self.shifts {
            let eta = self.eta[i];
            delta += model.row_log_lik(i, eta + d) - model.row_log_lik(i, eta);
        }

        if !(delta.is_finite() && log_u < delta) {
            return false;
        }
        for &(i, d) in &self.shifts {
            self.eta[i] += d;
        }
        self.theta[k] = value;
        self.log_prob += delta;
        true
    }
}
