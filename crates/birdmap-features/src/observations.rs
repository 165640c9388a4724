//! Occurrence records and their join onto grid cells.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use birdmap_core::CellKey;
use birdmap_grid::Grid;
use geo::Point;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Label given to every species outside the top-n.
pub const OTHER_LABEL: &str = "other";

/// A raw occurrence record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub species: String,
    pub longitude: f64,
    pub latitude: f64,
}

impl ObservationRecord {
    pub fn new(species: impl Into<String>, longitude: f64, latitude: f64) -> Self {
        Self {
            species: species.into(),
            longitude,
            latitude,
        }
    }
}

/// A record that fell inside a grid cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedObservation {
    pub species: String,
    pub cell: CellKey,
}

/// Outcome of [`join_observations`].
#[derive(Debug, Clone, Default)]
pub struct JoinResult {
    pub joined: Vec<JoinedObservation>,
    /// Records with a non-finite coordinate or outside every cell.
    pub dropped: usize,
}

/// Assign each record to the first grid cell containing it. Records outside
/// all cells, or with NaN/infinite coordinates, are dropped and counted.
pub fn join_observations(records: &[ObservationRecord], grid: &Grid) -> JoinResult {
    let mut result = JoinResult::default();
    for record in records {
        let point = Point::new(record.longitude, record.latitude);
        match grid.locate(point) {
            Some(cell) => result.joined.push(JoinedObservation {
                species: record.species.clone(),
                cell: cell.key.clone(),
            }),
            None => result.dropped += 1,
        }
    }
    debug!(
        records = records.len(),
        joined = result.joined.len(),
        dropped = result.dropped,
        "joined observations to grid"
    );
    result
}

/// Keep the `n` most frequent species labels and relabel every other record
/// to [`OTHER_LABEL`]. Equal counts are ordered by label. Returns the kept
/// labels, most frequent first.
pub fn relabel_top_species(observations: &mut [JoinedObservation], n: usize) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for obs in observations.iter() {
        *counts.entry(obs.species.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    let kept: Vec<String> = ranked.iter().take(n).map(|(s, _)| s.to_string()).collect();

    let keep: BTreeSet<&str> = kept.iter().map(|s| s.as_str()).collect();
    let mut relabelled = 0usize;
    for obs in observations.iter_mut() {
        if !keep.contains(obs.species.as_str()) {
            obs.species = OTHER_LABEL.to_string();
            relabelled += 1;
        }
    }
    if relabelled > 0 {
        info!(kept = ?kept, relabelled, "relabelled less frequent species as '{}'", OTHER_LABEL);
    }
    kept
}

/// Count records per `(species, cell)`.
pub fn count_observations(observations: &[JoinedObservation]) -> BTreeMap<(String, CellKey), u32> {
    let mut counts = BTreeMap::new();
    for obs in observations {
        *counts.entry((obs.species.clone(), obs.cell.clone())).or_insert(0u32) += 1;
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use birdmap_grid::{generate_grid, CellSize, Extent};
    use geo::{coord, MultiPolygon, Rect};

    fn grid() -> Grid {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        let boundary = MultiPolygon::new(vec![rect.to_polygon()]);
        generate_grid(&boundary, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap()
    }

    fn joined(species: &str) -> JoinedObservation {
        JoinedObservation {
            species: species.to_string(),
            cell: CellKey::from_corner(0.0, 0.0),
        }
    }

    #[test]
    fn test_join_drops_outside_and_nan() {
        let records = vec![
            ObservationRecord::new("wren", 0.25, 0.25),
            ObservationRecord::new("wren", 0.75, 0.25),
            ObservationRecord::new("wren", 3.0, 3.0),
            ObservationRecord::new("wren", f64::NAN, 0.1),
        ];
        let result = join_observations(&records, &grid());
        assert_eq!(result.joined.len(), 2);
        assert_eq!(result.dropped, 2);
        assert_eq!(result.joined[0].cell.as_str(), "0.0_0.0");
        assert_eq!(result.joined[1].cell.as_str(), "0.5_0.0");
    }

    #[test]
    fn test_relabel_top_species() {
        let mut obs: Vec<_> = ["a", "b", "b", "c", "c", "c", "d"].iter().map(|s| joined(s)).collect();
        let kept = relabel_top_species(&mut obs, 2);
        assert_eq!(kept, vec!["c".to_string(), "b".to_string()]);
        let labels: Vec<_> = obs.iter().map(|o| o.species.as_str()).collect();
        assert_eq!(labels, vec!["other", "b", "b", "c", "c", "c", "other"]);
    }

    #[test]
    fn test_relabel_ties_break_by_label() {
        let mut obs: Vec<_> = ["z", "y", "x"].iter().map(|s| joined(s)).collect();
        let kept = relabel_top_species(&mut obs, 1);
        assert_eq!(kept, vec!["x".to_string()]);
    }

    #[test]
    fn test_relabel_more_than_available() {
        let mut obs: Vec<_> = ["a", "b"].iter().map(|s| joined(s)).collect();
        let kept = relabel_top_species(&mut obs, 10);
        assert_eq!(kept.len(), 2);
        assert!(obs.iter().all(|o| o.species != OTHER_LABEL));
    }

    #[test]
    fn test_count_observations() {
        let mut obs = vec![joined("a"), joined("a"), joined("b")];
        obs[2].cell = CellKey::from_corner(0.5, 0.5);
        let counts = count_observations(&obs);
        assert_eq!(counts[&("a".to_string(), CellKey::from_corner(0.0, 0.0))], 2);
        assert_eq!(counts[&("b".to_string(), CellKey::from_corner(0.5, 0.5))], 1);
        assert_eq!(counts.len(), 2);
    }
}
