//! Metrics for the birdmap pipeline.
//!
//! Every metric the pipeline records is declared here as a structured
//! [`Metric`] constant, so names cannot drift between the code that records
//! them and the code that reads them. The `metrics` crate is re-exported;
//! recording is a no-op until the host installs a recorder.
//!
//! # Example
//!
//! ```rust,ignore
//! use birdmap_metrics::{describe_metrics, metric_defs, RunLabels};
//!
//! describe_metrics();
//!
//! let labels = RunLabels::new("bogota", "pooled_intercept_pooled_covariate_car");
//! metrics::gauge!(metric_defs::GRID_CELLS.name, &labels.to_labels()).set(120.0);
//! ```
//!
//! # Metric Type
//!
//! ```rust
//! use birdmap_metrics::{Metric, MetricKind};
//! use metrics::Unit;
//!
//! const FITS: Metric = Metric::counter("birdmap.fits")
//!     .with_description("Model fits started")
//!     .with_unit(Unit::Count)
//!     .with_labels(&["region", "model"]);
//!
//! assert_eq!(FITS.kind, MetricKind::Counter);
//! FITS.describe();
//! ```

pub use metrics;

use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

/// The kind of metric (counter, gauge, or histogram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// A monotonically increasing counter.
    Counter,
    /// A gauge that can go up and down.
    Gauge,
    /// A histogram for recording distributions.
    Histogram,
}

impl MetricKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A metric declaration with its metadata.
///
/// Built with const constructors so every definition is a compile-time
/// constant.
///
/// ```rust
/// use birdmap_metrics::{Metric, MetricKind};
/// use metrics::Unit;
///
/// const EDGES: Metric = Metric::gauge("birdmap.adjacency.edges")
///     .with_description("Undirected adjacency edges")
///     .with_unit(Unit::Count);
///
/// assert_eq!(EDGES.name, "birdmap.adjacency.edges");
/// assert_eq!(EDGES.kind, MetricKind::Gauge);
/// ```
#[derive(Debug, Clone)]
pub struct Metric {
    /// The metric name (e.g., "birdmap.grid.cells").
    pub name: &'static str,
    pub kind: MetricKind,
    /// Human-readable description of the metric.
    pub description: &'static str,
    pub unit: Option<Unit>,
    /// Expected label keys for this metric.
    pub labels: &'static [&'static str],
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self::new(name, MetricKind::Counter)
    }

    pub const fn gauge(name: &'static str) -> Self {
        Self::new(name, MetricKind::Gauge)
    }

    pub const fn histogram(name: &'static str) -> Self {
        Self::new(name, MetricKind::Histogram)
    }

    const fn new(name: &'static str, kind: MetricKind) -> Self {
        Self {
            name,
            kind,
            description: "",
            unit: None,
            labels: &[],
        }
    }

    pub const fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub const fn with_labels(mut self, labels: &'static [&'static str]) -> Self {
        self.labels = labels;
        self
    }

    /// Registers this metric's description with the installed recorder.
    pub fn describe(&self) {
        match (self.kind, self.unit) {
            (MetricKind::Counter, Some(unit)) => {
                describe_counter!(self.name, unit, self.description);
            }
            (MetricKind::Counter, None) => {
                describe_counter!(self.name, self.description);
            }
            (MetricKind::Gauge, Some(unit)) => {
                describe_gauge!(self.name, unit, self.description);
            }
            (MetricKind::Gauge, None) => {
                describe_gauge!(self.name, self.description);
            }
            (MetricKind::Histogram, Some(unit)) => {
                describe_histogram!(self.name, unit, self.description);
            }
            (MetricKind::Histogram, None) => {
                describe_histogram!(self.name, self.description);
            }
        }
    }
}

/// All metric definitions for the pipeline.
pub mod metric_defs {
    use super::{Metric, Unit};

    // ========================================================================
    // Standard Label Keys
    // ========================================================================

    /// Labels present on every run-scoped metric.
    pub const RUN_LABELS: &[&str] = &["region", "model"];

    // ========================================================================
    // Geometry
    // ========================================================================

    /// Grid cells intersecting the region boundary.
    pub const GRID_CELLS: Metric = Metric::gauge("birdmap.grid.cells")
        .with_description("Grid cells intersecting the region boundary")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Undirected edges of the adjacency graph.
    pub const ADJACENCY_EDGES: Metric = Metric::gauge("birdmap.adjacency.edges")
        .with_description("Undirected edges of the cell adjacency graph")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Cells with no neighbours.
    pub const ADJACENCY_ISOLATED: Metric = Metric::gauge("birdmap.adjacency.isolated_cells")
        .with_description("Grid cells without any neighbour")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    // ========================================================================
    // Features
    // ========================================================================

    /// Observation records joined to a grid cell.
    pub const OBSERVATIONS_JOINED: Metric = Metric::counter("birdmap.observations.joined")
        .with_description("Observation records assigned to a grid cell")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Observation records outside every grid cell.
    pub const OBSERVATIONS_DROPPED: Metric = Metric::counter("birdmap.observations.dropped")
        .with_description("Observation records outside every grid cell")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Transient covariate fetch failures that were retried.
    pub const COVARIATE_RETRIES: Metric = Metric::counter("birdmap.covariates.retries")
        .with_description("Covariate fetches retried after a transient failure")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Rows of the prepared species x cell table.
    pub const TABLE_ROWS: Metric = Metric::gauge("birdmap.table.rows")
        .with_description("Rows of the prepared species x cell table")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    // ========================================================================
    // Inference
    // ========================================================================

    /// Posterior draws kept across all chains.
    pub const SAMPLER_DRAWS: Metric = Metric::counter("birdmap.sampler.draws")
        .with_description("Posterior draws kept across all chains")
        .with_unit(Unit::Count)
        .with_labels(RUN_LABELS);

    /// Per-chain acceptance rate.
    ///
    /// Labels: region, model, chain
    pub const SAMPLER_ACCEPTANCE: Metric = Metric::histogram("birdmap.sampler.acceptance_rate")
        .with_description("Fraction of accepted proposals per chain")
        .with_labels(&["region", "model", "chain"]);

    /// Wall time of a sampling run.
    pub const SAMPLER_DURATION: Metric = Metric::histogram("birdmap.sampler.duration_seconds")
        .with_description("Wall time of one sampling run")
        .with_unit(Unit::Seconds)
        .with_labels(RUN_LABELS);

    /// Returns a slice of all defined metrics.
    pub const ALL: &[&Metric] = &[
        &GRID_CELLS,
        &ADJACENCY_EDGES,
        &ADJACENCY_ISOLATED,
        &OBSERVATIONS_JOINED,
        &OBSERVATIONS_DROPPED,
        &COVARIATE_RETRIES,
        &TABLE_ROWS,
        &SAMPLER_DRAWS,
        &SAMPLER_ACCEPTANCE,
        &SAMPLER_DURATION,
    ];
}

/// Labels identifying one pipeline run.
///
/// ```rust
/// use birdmap_metrics::RunLabels;
///
/// let labels = RunLabels::new("bogota", "intercept_car");
/// let extended = labels.with(&[("chain", "0".to_string())]);
/// assert_eq!(extended.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLabels {
    /// Region the grid was built over.
    pub region: String,
    /// Model variant name.
    pub model: String,
}

impl RunLabels {
    pub fn new(region: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            model: model.into(),
        }
    }

    /// Converts the labels to the metrics crate label format.
    pub fn to_labels(&self) -> Vec<(&'static str, String)> {
        vec![("region", self.region.clone()), ("model", self.model.clone())]
    }

    /// Returns labels with additional key-value pairs.
    pub fn with(&self, extra: &[(&'static str, String)]) -> Vec<(&'static str, String)> {
        let mut labels = self.to_labels();
        labels.extend_from_slice(extra);
        labels
    }
}

/// Describes all pipeline metrics. Call once after installing a recorder.
pub fn describe_metrics() {
    for metric in metric_defs::ALL {
        metric.describe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_labels() {
        let labels = RunLabels::new("bogota", "intercept_car");
        let label_vec = labels.to_labels();
        assert_eq!(label_vec.len(), 2);
        assert!(label_vec.contains(&("region", "bogota".to_string())));
        assert!(label_vec.contains(&("model", "intercept_car".to_string())));
    }

    #[test]
    fn test_with_extra_labels() {
        let labels = RunLabels::new("bogota", "intercept_car");
        let extended = labels.with(&[("chain", "2".to_string())]);
        assert_eq!(extended.len(), 3);
        assert!(extended.contains(&("chain", "2".to_string())));
    }

    #[test]
    fn test_metric_definitions() {
        assert_eq!(metric_defs::GRID_CELLS.name, "birdmap.grid.cells");
        assert_eq!(metric_defs::GRID_CELLS.kind, MetricKind::Gauge);
        assert_eq!(metric_defs::OBSERVATIONS_DROPPED.kind, MetricKind::Counter);
        assert_eq!(metric_defs::SAMPLER_ACCEPTANCE.kind, MetricKind::Histogram);
        assert_eq!(metric_defs::SAMPLER_ACCEPTANCE.labels, &["region", "model", "chain"]);
        assert_eq!(metric_defs::SAMPLER_DURATION.unit, Some(Unit::Seconds));
    }

    #[test]
    fn test_all_metrics_unique() {
        assert_eq!(metric_defs::ALL.len(), 10);
        let mut names: Vec<_> = metric_defs::ALL.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), metric_defs::ALL.len());
        assert!(metric_defs::ALL.iter().all(|m| !m.description.is_empty()));
        assert!(metric_defs::ALL.iter().all(|m| m.name.starts_with("birdmap.")));
    }

    #[test]
    fn test_metric_minimal() {
        const MINIMAL: Metric = Metric::counter("minimal");
        assert_eq!(MINIMAL.kind, MetricKind::Counter);
        assert_eq!(MINIMAL.description, "");
        assert_eq!(MINIMAL.unit, None);
        assert_eq!(MINIMAL.labels, &[] as &[&str]);
    }

    #[test]
    fn test_describe_without_recorder() {
        describe_metrics();
    }
}
