//! The end-to-end pipeline: boundary and observations in, posterior out.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use birdmap_core::CellKey;
use birdmap_features::{
    collect_covariates, fit_scaling, prepare_table, CovariateSource, CovariateTable, DesignMatrix, FittedScaling,
    PreparedTable,
};
use birdmap_grid::{build_adjacency, generate_grid, AdjacencyGraph, AdjacencyMatrix, Extent, Grid};
use birdmap_metrics::{metric_defs, RunLabels};
use birdmap_model::posterior::{posterior_predictive, prediction_rows, summarize};
use birdmap_model::{build_model, InferenceEngine, MetropolisSampler, PredictionRow, SummaryRow};
use geo::MultiPolygon;
use nalgebra::DMatrix;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;

/// Where cell covariates come from.
pub enum Covariates<'a> {
    /// Already collected and converted.
    Precomputed(&'a CovariateTable),
    /// Fetched per cell during the run.
    Source(&'a dyn CovariateSource),
}

/// Everything up to, but not including, model fitting.
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub extent: Extent,
    pub grid: Grid,
    pub adjacency: AdjacencyGraph,
    pub covariates: CovariateTable,
    pub covariate_retries: u64,
    pub table: PreparedTable,
}

/// Result of fitting one model.
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    /// Species the model was restricted to, `None` for a joint fit.
    pub species: Option<String>,
    pub model: String,
    pub rows: usize,
    pub observed_rows: usize,
    pub draws: usize,
    pub acceptance_rate: f64,
    /// Column transforms of the design, absent for models without covariates.
    pub scaling: Option<FittedScaling>,
    pub summary: Vec<SummaryRow>,
    pub predictions: Vec<PredictionRow>,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub region: String,
    pub model: String,
    pub extent: Extent,
    pub grid_cells: usize,
    pub adjacency_edges: usize,
    pub isolated_cells: usize,
    pub observations_joined: usize,
    pub observations_dropped: usize,
    pub covariate_retries: u64,
    pub table_rows: usize,
    pub species: Vec<String>,
    pub adjacency: BTreeMap<CellKey, BTreeSet<CellKey>>,
    pub fits: Vec<FitReport>,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Build the grid, the adjacency graph, the covariates and the prepared
/// table.
///
/// # Errors
///
/// [`PipelineError::NoCellsMatched`] if no lattice cell intersects the
/// boundary, plus any grid or feature error.
pub fn prepare(
    boundary: &MultiPolygon<f64>,
    observations: &[birdmap_features::ObservationRecord],
    covariates: Covariates<'_>,
    config: &PipelineConfig,
) -> Result<PreparedRun, PipelineError> {
    let labels = RunLabels::new(&config.region, config.model.name.to_string()).to_labels();

    let extent = match config.grid.extent {
        Some(extent) => extent,
        None => Extent::of(boundary).ok_or(PipelineError::EmptyBoundary)?,
    };
    let grid = generate_grid(boundary, extent, config.grid.cell_size)?;
    if grid.is_empty() {
        return Err(PipelineError::NoCellsMatched { extent });
    }
    metrics::gauge!(metric_defs::GRID_CELLS.name, &labels).set(grid.len() as f64);

    let adjacency = build_adjacency(&grid, config.grid.touch_policy)?;
    let matrix = adjacency.matrix();
    metrics::gauge!(metric_defs::ADJACENCY_EDGES.name, &labels).set(matrix.edge_count() as f64);
    metrics::gauge!(metric_defs::ADJACENCY_ISOLATED.name, &labels).set(matrix.isolated().len() as f64);

    let (covariates, covariate_retries) = match covariates {
        Covariates::Precomputed(table) => (table.clone(), 0),
        Covariates::Source(source) => {
            let (table, stats) =
                collect_covariates(&grid, source, config.features.land_cover_mode, &config.retrieval)?;
            (table, stats.retries)
        }
    };
    metrics::counter!(metric_defs::COVARIATE_RETRIES.name, &labels).increment(covariate_retries);

    let table = prepare_table(
        observations,
        &covariates,
        &grid,
        adjacency.mapping(),
        config.features.max_species,
    )?;
    let dropped = table.dropped_observations();
    metrics::counter!(metric_defs::OBSERVATIONS_JOINED.name, &labels)
        .increment((observations.len() - dropped) as u64);
    metrics::counter!(metric_defs::OBSERVATIONS_DROPPED.name, &labels).increment(dropped as u64);
    metrics::gauge!(metric_defs::TABLE_ROWS.name, &labels).set(table.len() as f64);

    Ok(PreparedRun {
        extent,
        grid,
        adjacency,
        covariates,
        covariate_retries,
        table,
    })
}

/// Scale, build, sample and summarise one model over `table`.
pub fn fit(
    table: &PreparedTable,
    adjacency: &AdjacencyMatrix,
    config: &PipelineConfig,
    species: Option<String>,
) -> Result<FitReport, PipelineError> {
    let spec = config.model.name;
    let labels = RunLabels::new(&config.region, spec.to_string());

    let (design, scaling) = if spec.uses_covariates() {
        let (design, scaling) = fit_scaling(table, &config.features.scaling)?;
        (design, Some(scaling))
    } else {
        (DesignMatrix::new(Vec::new(), DMatrix::zeros(table.len(), 0)), None)
    };

    let model = build_model(spec, table, &design, adjacency, &config.model.options())?;
    let sampler = MetropolisSampler::new(config.sampler.clone());

    let started = Instant::now();
    let trace = sampler.sample(&model)?;
    let base = labels.to_labels();
    metrics::histogram!(metric_defs::SAMPLER_DURATION.name, &base).record(started.elapsed().as_secs_f64());
    metrics::counter!(metric_defs::SAMPLER_DRAWS.name, &base).increment(trace.total_draws() as u64);
    for chain in &trace.chains {
        let chain_labels = labels.with(&[("chain", chain.chain.to_string())]);
        metrics::histogram!(metric_defs::SAMPLER_ACCEPTANCE.name, &chain_labels).record(chain.acceptance_rate);
        if chain.acceptance_rate < 0.05 {
            warn!(chain = chain.chain, rate = chain.acceptance_rate, "chain barely moved");
        }
    }

    let summary = summarize(&model, &trace, config.posterior.hdi_prob)?;
    let seed = config.posterior.predictive_seed.unwrap_or(config.sampler.seed);
    let predictive = posterior_predictive(&model, &trace, seed)?;
    let predictions = prediction_rows(table, &predictive)?;

    Ok(FitReport {
        species,
        model: spec.to_string(),
        rows: table.len(),
        observed_rows: model.observed_rows(),
        draws: trace.total_draws(),
        acceptance_rate: trace.mean_acceptance_rate(),
        scaling,
        summary,
        predictions,
    })
}

/// Species ordered by observed cells, most first, ties by label.
fn most_observed_species(table: &PreparedTable, n: usize) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in table.rows().iter() {
        let entry = counts.entry(row.species.as_str()).or_insert(0);
        if row.y.is_some() {
            *entry += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(n).map(|(s, _)| s.to_string()).collect()
}

/// Run the whole pipeline.
///
/// With `model.per_species` set, one model is fitted per selected species on
/// that species' rows; otherwise a single joint model covers every species.
pub fn run_pipeline(
    boundary: &MultiPolygon<f64>,
    observations: &[birdmap_features::ObservationRecord],
    covariates: Covariates<'_>,
    config: &PipelineConfig,
) -> Result<RunReport, PipelineError> {
    config.validate()?;
    info!(region = %config.region, model = %config.model.name, "pipeline started");

    let run = prepare(boundary, observations, covariates, config)?;
    let matrix = run.adjacency.matrix();

    let fits = match config.model.per_species {
        None => vec![fit(&run.table, matrix, config, None)?],
        Some(n) => {
            let mut fits = Vec::new();
            for label in most_observed_species(&run.table, n) {
                let Some(sub) = run.table.for_species(&label) else {
                    continue;
                };
                info!(species = %label, rows = sub.len(), "fitting species");
                fits.push(fit(&sub, matrix, config, Some(label))?);
            }
            fits
        }
    };

    let report = RunReport {
        region: config.region.clone(),
        model: config.model.name.to_string(),
        extent: run.extent,
        grid_cells: run.grid.len(),
        adjacency_edges: matrix.edge_count(),
        isolated_cells: matrix.isolated().len(),
        observations_joined: observations.len() - run.table.dropped_observations(),
        observations_dropped: run.table.dropped_observations(),
        covariate_retries: run.covariate_retries,
        table_rows: run.table.len(),
        species: run.table.species().iter().cloned().collect(),
        adjacency: run.adjacency.adjacency_list().clone(),
        fits,
    };
    info!(fits = report.fits.len(), cells = report.grid_cells, "pipeline finished");
    Ok(report)
}
