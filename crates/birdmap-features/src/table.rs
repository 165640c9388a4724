//! The model-ready species x cell table.

use std::collections::BTreeSet;

use birdmap_core::{AdjIdx, CellKey, Idx, IdxVec, ObsIdx, SpeciesIdx};
use birdmap_grid::{Grid, IndexMapping};
use serde::Serialize;
use tracing::{debug, info};

use crate::covariates::{CellCovariates, Covariate, CovariateTable};
use crate::observations::{count_observations, join_observations, relabel_top_species, ObservationRecord};
use crate::{FeatureError, Result};

/// One (species, cell) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedRow {
    pub adj_idx: AdjIdx,
    pub cell: CellKey,
    pub species: String,
    pub species_idx: SpeciesIdx,
    /// Observation count, `None` when the species was never recorded here.
    pub y: Option<u32>,
    pub covariates: CellCovariates,
    pub sum_land_cover: f64,
}

/// Every observed species crossed with every cell, sorted by adjacency index
/// and then species.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreparedTable {
    rows: IdxVec<ObsIdx, PreparedRow>,
    species: IdxVec<SpeciesIdx, String>,
    n_cells: usize,
    dropped_observations: usize,
}

impl PreparedTable {
    pub fn rows(&self) -> &IdxVec<ObsIdx, PreparedRow> {
        &self.rows
    }

    pub fn row(&self, idx: ObsIdx) -> &PreparedRow {
        &self.rows[idx]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Species labels, sorted. Position is the [`SpeciesIdx`].
    pub fn species(&self) -> &IdxVec<SpeciesIdx, String> {
        &self.species
    }

    pub fn n_species(&self) -> usize {
        self.species.len()
    }

    /// Size of the adjacency domain the rows are indexed against.
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// Records that matched no grid cell.
    pub fn dropped_observations(&self) -> usize {
        self.dropped_observations
    }

    pub fn species_codes(&self) -> IdxVec<ObsIdx, SpeciesIdx> {
        self.rows.map(|r| r.species_idx)
    }

    pub fn adj_indices(&self) -> IdxVec<ObsIdx, AdjIdx> {
        self.rows.map(|r| r.adj_idx)
    }

    pub fn counts(&self) -> IdxVec<ObsIdx, Option<u32>> {
        self.rows.map(|r| r.y)
    }

    /// Rows with a recorded count.
    pub fn observed_rows(&self) -> usize {
        self.rows.iter().filter(|r| r.y.is_some()).count()
    }

    pub fn column(&self, cov: Covariate) -> IdxVec<ObsIdx, f64> {
        self.rows.map(|r| r.covariates.get(cov))
    }

    /// The rows of a single species over every cell, with the species domain
    /// reduced to that one label. `None` if the label is not in the table.
    pub fn for_species(&self, label: &str) -> Option<PreparedTable> {
        if !self.species.iter().any(|s| s == label) {
            return None;
        }
        let rows = self
            .rows
            .iter()
            .filter(|r| r.species == label)
            .map(|r| PreparedRow {
                species_idx: SpeciesIdx(0),
                ..r.clone()
            })
            .collect();
        Some(PreparedTable {
            rows,
            species: IdxVec::from_vec(vec![label.to_string()]),
            n_cells: self.n_cells,
            dropped_observations: self.dropped_observations,
        })
    }
}

/// Build the [`PreparedTable`].
///
/// Observations are joined onto `grid`, optionally reduced to the
/// `species_filter` most frequent labels (the rest become `"other"`) and
/// counted. The table then holds one row for every species and every cell of
/// `mapping`, whether observed or not.
///
/// # Errors
///
/// - [`FeatureError::MissingCovariates`] if any grid cell has no covariates
/// - [`FeatureError::UnknownCell`] if covariates reference a cell outside
///   `mapping`
pub fn prepare_table(
    observations: &[ObservationRecord],
    covariates: &CovariateTable,
    grid: &Grid,
    mapping: &IndexMapping,
    species_filter: Option<usize>,
) -> Result<PreparedTable> {
    let missing: Vec<&CellKey> = mapping.keys().iter().filter(|k| !covariates.contains(k)).collect();
    if !missing.is_empty() {
        let sample = missing
            .iter()
            .take(5)
            .map(|k| k.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(FeatureError::MissingCovariates {
            count: missing.len(),
            sample,
        });
    }
    if let Some(unknown) = covariates.keys().find(|k| mapping.get(k).is_none()) {
        return Err(FeatureError::UnknownCell(unknown.clone()));
    }

    let mut joined = join_observations(observations, grid);
    if let Some(n) = species_filter {
        relabel_top_species(&mut joined.joined, n);
    }
    let counts = count_observations(&joined.joined);

    let species: IdxVec<SpeciesIdx, String> = joined
        .joined
        .iter()
        .map(|o| o.species.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut rows = IdxVec::new();
    for (adj_idx, cell) in mapping.iter() {
        // Checked above: every mapped cell has covariates.
        let Some(cov) = covariates.get(cell) else { continue };
        for (species_idx, label) in species.iter_enumerated() {
            rows.push(PreparedRow {
                adj_idx,
                cell: cell.clone(),
                species: label.clone(),
                species_idx,
                y: counts.get(&(label.clone(), cell.clone())).copied(),
                covariates: cov.clone(),
                sum_land_cover: cov.sum_land_cover(),
            });
        }
    }

    let table = PreparedTable {
        rows,
        species,
        n_cells: mapping.len(),
        dropped_observations: joined.dropped,
    };
    debug_assert!(table
        .rows
        .as_slice()
        .windows(2)
        .all(|w| (w[0].adj_idx, w[0].species_idx) < (w[1].adj_idx, w[1].species_idx)));

    info!(
        rows = table.len(),
        species = table.n_species(),
        cells = table.n_cells(),
        observed = table.observed_rows(),
        dropped = table.dropped_observations,
        "prepared table"
    );
    debug!(species = ?table.species.as_slice(), "species domain");
    Ok(table)
}

impl PreparedTable {
    /// Assemble a table from already-joined rows. Rows are sorted by
    /// `(adj_idx, species_idx)`.
    pub fn from_rows(mut rows: Vec<PreparedRow>, species: Vec<String>, n_cells: usize) -> Self {
        rows.sort_by(|a, b| (a.adj_idx, a.species_idx).cmp(&(b.adj_idx, b.species_idx)));
        Self {
            rows: IdxVec::from_vec(rows),
            species: IdxVec::from_vec(species),
            n_cells,
            dropped_observations: 0,
        }
    }

    /// Row position of a `(species, cell)` pair.
    pub fn position(&self, species: SpeciesIdx, cell: AdjIdx) -> Option<ObsIdx> {
        let target = (cell, species);
        self.rows
            .as_slice()
            .binary_search_by(|r| (r.adj_idx, r.species_idx).cmp(&target))
            .ok()
            .map(ObsIdx::new)
    }
}
