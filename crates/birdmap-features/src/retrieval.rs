//! Fan-out of per-cell covariate requests to a remote source.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use birdmap_core::CellKey;
use birdmap_grid::{Grid, GridCell};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::covariates::{CellCovariates, CovariateTable, RawCellStats};
use crate::land_cover::LandCoverMode;
use crate::{FeatureError, Result};

/// Failure reported by a [`CovariateSource`].
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Worth retrying (timeouts, rate limits).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying will not help.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// A remote-sensing backend queried once per grid cell.
///
/// Calls must be idempotent: the same cell always yields the same statistics,
/// so failed calls can be retried and calls can run in any order.
pub trait CovariateSource: Send + Sync {
    fn fetch(&self, cell: &GridCell) -> std::result::Result<RawCellStats, SourceError>;
}

/// Worker pool and retry settings for [`collect_covariates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Concurrent requests.
    pub parallelism: usize,
    /// Extra attempts after a transient failure.
    pub max_retries: u32,
    /// Pause before each retry, multiplied by the attempt number.
    pub retry_backoff_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            parallelism: 8,
            max_retries: 3,
            retry_backoff_ms: 0,
        }
    }
}

/// Counters from one [`collect_covariates`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalStats {
    pub cells: usize,
    pub retries: u64,
}

/// Fetch and convert covariates for every cell of `grid`.
///
/// Requests run on a dedicated pool of `config.parallelism` threads.
/// Transient failures are retried up to `config.max_retries` times; a
/// permanent failure or exhausted retries fails the whole collection, since
/// every cell needs covariates. Results are keyed by cell, so completion
/// order does not matter.
pub fn collect_covariates(
    grid: &Grid,
    source: &dyn CovariateSource,
    mode: LandCoverMode,
    config: &RetrievalConfig,
) -> Result<(CovariateTable, RetrievalStats)> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism.max(1))
        .thread_name(|i| format!("covariates-{}", i))
        .build()
        .map_err(|e| FeatureError::ThreadPool(e.to_string()))?;

    info!(
        cells = grid.len(),
        parallelism = config.parallelism,
        "collecting covariates"
    );

    let retries = AtomicU64::new(0);
    let mut fetched: Vec<(CellKey, Result<CellCovariates>)> = pool.install(|| {
        grid.cells()
            .par_iter()
            .map(|cell| {
                let result = fetch_with_retry(source, cell, config, &retries)
                    .and_then(|raw| CellCovariates::from_raw(&cell.key, &raw, mode));
                (cell.key.clone(), result)
            })
            .collect()
    });
    fetched.sort_by(|a, b| a.0.cmp(&b.0));

    let mut table = CovariateTable::new();
    for (key, result) in fetched {
        table.insert(key, result?);
    }

    let stats = RetrievalStats {
        cells: table.len(),
        retries: retries.load(Ordering::Relaxed),
    };
    debug!(?stats, "covariate collection finished");
    Ok((table, stats))
}

fn fetch_with_retry(
    source: &dyn CovariateSource,
    cell: &GridCell,
    config: &RetrievalConfig,
    retries: &AtomicU64,
) -> Result<RawCellStats> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match source.fetch(cell) {
            Ok(raw) => return Ok(raw),
            Err(SourceError::Transient(message)) if attempt <= config.max_retries => {
                retries.fetch_add(1, Ordering::Relaxed);
                warn!(cell = %cell.key, attempt, %message, "transient covariate fetch failure, retrying");
                if config.retry_backoff_ms > 0 {
                    std::thread::sleep(Duration::from_millis(config.retry_backoff_ms * attempt as u64));
                }
            }
            Err(e) => {
                return Err(FeatureError::Retrieval {
                    cell: cell.key.clone(),
                    attempts: attempt,
                    message: e.to_string(),
                })
            }
        }
    }
}
