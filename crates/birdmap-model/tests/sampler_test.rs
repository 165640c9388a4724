//! Sampler and posterior tests.
//!
//! Seeded runs must reproduce their traces exactly, and a model with a
//! known answer must recover it: a pooled intercept fitted to constant
//! counts concentrates near the log of that count.

use birdmap_core::{AdjIdx, CellKey, Idx, SpeciesIdx};
use birdmap_features::{CellCovariates, DesignMatrix, Percentiles, PreparedRow, PreparedTable};
use birdmap_grid::AdjacencyMatrix;
use birdmap_model::posterior::{posterior_predictive, prediction_rows, summarize};
use birdmap_model::{build_model, InferenceEngine, MetropolisSampler, ModelError, ModelOptions, SamplerConfig};
use nalgebra::DMatrix;

fn flat_covariates() -> CellCovariates {
    let p = Percentiles {
        p5: 0.0,
        p50: 0.0,
        p95: 0.0,
    };
    CellCovariates {
        population_density: 0.0,
        elevation: p,
        lst_day: p,
        lst_night: p,
        land_cover: [0.0; 17],
    }
}

/// One species over a path of `n` cells with count `y` everywhere except
/// the masked cells.
fn path_table(n: usize, y: u32, masked: &[usize]) -> (PreparedTable, AdjacencyMatrix) {
    let rows = (0..n)
        .map(|c| PreparedRow {
            adj_idx: AdjIdx::new(c),
            cell: CellKey::from_corner(c as f64, 0.0),
            species: "heron".into(),
            species_idx: SpeciesIdx::new(0),
            y: if masked.contains(&c) { None } else { Some(y) },
            covariates: flat_covariates(),
            sum_land_cover: 0.0,
        })
        .collect();
    let table = PreparedTable::from_rows(rows, vec!["heron".into()], n);
    let edges: Vec<_> = (1..n).map(|i| (AdjIdx::new(i - 1), AdjIdx::new(i))).collect();
    (table, AdjacencyMatrix::from_edges(n, &edges).unwrap())
}

fn config(seed: u64, tune: usize, draws: usize) -> SamplerConfig {
    SamplerConfig {
        chains: 2,
        tune,
        draws,
        seed,
        ..Default::default()
    }
}

#[test]
fn test_same_seed_same_trace() {
    let (table, adjacency) = path_table(6, 3, &[2]);
    let design = DesignMatrix::new(vec!["x".into()], DMatrix::from_fn(6, 1, |i, _| i as f64 / 6.0));
    let model = build_model(
        "varying_intercept_pooled_covariate_car".parse().unwrap(),
        &table,
        &design,
        &adjacency,
        &ModelOptions::default(),
    )
    .unwrap();

    let a = MetropolisSampler::new(config(11, 60, 40)).sample(&model).unwrap();
    let b = MetropolisSampler::new(config(11, 60, 40)).sample(&model).unwrap();
    let c = MetropolisSampler::new(config(12, 60, 40)).sample(&model).unwrap();

    assert_eq!(a, b);
    assert_ne!(a.chains[0].draws, c.chains[0].draws);
    assert_eq!(a.n_chains(), 2);
    assert_eq!(a.total_draws(), 80);
    assert_eq!(a.chains[1].chain, 1);
    assert!(a.chains.iter().all(|c| c.draws.iter().all(|d| d.len() == model.dim())));

    let pp_a = posterior_predictive(&model, &a, 5).unwrap();
    let pp_b = posterior_predictive(&model, &b, 5).unwrap();
    assert_eq!(pp_a, pp_b);
}

#[test]
fn test_pooled_intercept_recovers_log_count() {
    let (table, adjacency) = path_table(20, 5, &[]);
    // a zero covariate leaves the rate to the intercept alone
    let design = DesignMatrix::new(vec!["zero".into()], DMatrix::zeros(20, 1));
    let model = build_model(
        "pooled_intercept_pooled_covariate".parse().unwrap(),
        &table,
        &design,
        &adjacency,
        &ModelOptions::default(),
    )
    .unwrap();

    let trace = MetropolisSampler::new(config(3, 500, 500)).sample(&model).unwrap();
    let rate = trace.mean_acceptance_rate();
    assert!(rate > 0.1 && rate < 0.9, "acceptance rate {}", rate);

    let summary = summarize(&model, &trace, 0.95).unwrap();
    let intercept = summary.iter().find(|r| r.name == "intercept").unwrap();
    assert!(
        (intercept.mean - 5f64.ln()).abs() < 0.1,
        "intercept mean {} far from ln 5",
        intercept.mean
    );
    assert!(intercept.hdi_lower < intercept.mean && intercept.mean < intercept.hdi_upper);
    assert!(intercept.sd > 0.0 && intercept.sd < 0.5);

    let predictive = posterior_predictive(&model, &trace, 9).unwrap();
    assert_eq!(predictive.n_draws(), 1000);
    let rows = prediction_rows(&table, &predictive).unwrap();
    assert_eq!(rows.len(), 20);
    for row in &rows {
        assert!((row.pred - 5.0).abs() < 0.6, "prediction {} for {}", row.pred, row.cell);
        assert!((row.log_pred - (row.pred + 1.0).ln()).abs() < 1e-12);
    }
}

#[test]
fn test_masked_rows_receive_predictions() {
    let (table, adjacency) = path_table(5, 2, &[0, 4]);
    let design = DesignMatrix::new(vec![], DMatrix::zeros(5, 0));
    let model = build_model(
        "intercept_car".parse().unwrap(),
        &table,
        &design,
        &adjacency,
        &ModelOptions::default(),
    )
    .unwrap();
    assert_eq!(model.observed_rows(), 3);

    let trace = MetropolisSampler::new(config(1, 40, 30)).sample(&model).unwrap();
    let rows = prediction_rows(&table, &posterior_predictive(&model, &trace, 2).unwrap()).unwrap();
    assert_eq!(rows[0].y, None);
    assert_eq!(rows[4].y, None);
    assert!(rows.iter().all(|r| r.pred.is_finite() && r.pred >= 0.0));
}

#[test]
fn test_summary_names_cover_all_elements() {
    let (table, adjacency) = path_table(4, 1, &[]);
    let design = DesignMatrix::new(vec![], DMatrix::zeros(4, 0));
    let model = build_model(
        "intercept_car".parse().unwrap(),
        &table,
        &design,
        &adjacency,
        &ModelOptions::default(),
    )
    .unwrap();
    let trace = MetropolisSampler::new(config(4, 20, 10)).sample(&model).unwrap();
    let summary = summarize(&model, &trace, 0.9).unwrap();
    let names: Vec<_> = summary.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(
        names,
        ["intercept", "alpha", "sigma_phi", "phi[0]", "phi[1]", "phi[2]", "phi[3]", "mu[0]", "mu[1]", "mu[2]", "mu[3]"]
    );
    let alpha = &summary[1];
    assert!(alpha.hdi_lower > 0.0 && alpha.hdi_upper < 1.0);

    assert!(matches!(
        summarize(&model, &trace, 0.0),
        Err(ModelError::InvalidProbability(_))
    ));
}

#[test]
fn test_invalid_sampler_config() {
    let (table, adjacency) = path_table(3, 1, &[]);
    let design = DesignMatrix::new(vec![], DMatrix::zeros(3, 0));
    let model = build_model(
        "intercept_car".parse().unwrap(),
        &table,
        &design,
        &adjacency,
        &ModelOptions::default(),
    )
    .unwrap();
    let sampler = MetropolisSampler::new(SamplerConfig {
        chains: 0,
        ..Default::default()
    });
    assert!(matches!(sampler.sample(&model), Err(ModelError::InvalidSampler(_))));

    let sampler = MetropolisSampler::new(SamplerConfig {
        draws: 0,
        ..Default::default()
    });
    assert!(matches!(sampler.sample(&model), Err(ModelError::InvalidSampler(_))));
}
