//! Regular lattice generation clipped to a region boundary.

use std::collections::HashMap;

use birdmap_core::CellKey;
use geo::{coord, BoundingRect, Intersects, MultiPolygon, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{GridError, Result};

// ============================================================================
// Extent and cell size
// ============================================================================

/// Bounding extent of the lattice, `(xmin, xmax, ymin, ymax)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extent {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self { xmin, xmax, ymin, ymax }
    }

    /// Bounding box of a boundary geometry. `None` for an empty geometry.
    pub fn of(boundary: &MultiPolygon<f64>) -> Option<Self> {
        boundary
            .bounding_rect()
            .map(|r| Self::new(r.min().x, r.max().x, r.min().y, r.max().y))
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.xmin, self.xmax, self.ymin, self.ymax]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.xmax < self.xmin || self.ymax < self.ymin {
            return Err(GridError::InvalidExtent {
                xmin: self.xmin,
                xmax: self.xmax,
                ymin: self.ymin,
                ymax: self.ymax,
            });
        }
        Ok(())
    }
}

/// Cell dimensions. `height` steps along y, `width` along x.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellSize {
    pub height: f64,
    pub width: f64,
}

impl CellSize {
    pub fn new(height: f64, width: f64) -> Self {
        Self { height, width }
    }

    /// Square cells of side `size`.
    pub fn square(size: f64) -> Self {
        Self::new(size, size)
    }

    fn validate(&self) -> Result<()> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if !ok(self.height) || !ok(self.width) {
            return Err(GridError::InvalidCellSize {
                height: self.height,
                width: self.width,
            });
        }
        Ok(())
    }
}

/// Lattice boundaries `min, min + step, ...` up to and including the first
/// value at or past `max + step`, the way a half-open `arange(min, max + step, step)`
/// enumerates them. Every value but the last starts a cell.
///
/// Values follow numpy's fill: `min`, `min + step`, then `min + i * delta`
/// with `delta = (min + step) - min`. Keys are built from these exact floats,
/// so covariate tables keyed by the same enumeration join bit for bit.
fn lattice_steps(min: f64, max: f64, step: f64) -> Vec<f64> {
    let stop = max + step;
    let count = ((stop - min) / step).ceil().max(0.0) as usize;
    let second = min + step;
    let delta = second - min;
    (0..count)
        .map(|i| match i {
            0 => min,
            1 => second,
            _ => min + i as f64 * delta,
        })
        .collect()
}

// ============================================================================
// Grid
// ============================================================================

/// One retained lattice cell.
#[derive(Debug, Clone)]
pub struct GridCell {
    /// Join key derived from the lower-left corner.
    pub key: CellKey,
    /// Lattice column (x step number).
    pub col: usize,
    /// Lattice row (y step number).
    pub row: usize,
    /// Axis-aligned bounds of the cell.
    pub rect: Rect<f64>,
    /// The cell as a polygon.
    pub polygon: Polygon<f64>,
}

impl GridCell {
    /// Lower-left corner.
    pub fn corner(&self) -> (f64, f64) {
        (self.rect.min().x, self.rect.min().y)
    }
}

/// A lattice of cells clipped to a region boundary.
///
/// Cells are stored column-major: all rows of the first column, then the
/// next column. That enumeration order is the tie-break for points on a
/// shared edge (see [`Grid::locate`]).
#[derive(Debug, Clone)]
pub struct Grid {
    extent: Extent,
    cell_size: CellSize,
    cells: Vec<GridCell>,
    by_key: HashMap<CellKey, usize>,
    by_lattice: HashMap<(usize, usize), usize>,
    cols: usize,
    rows: usize,
}

impl Grid {
    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn cell_size(&self) -> CellSize {
        self.cell_size
    }

    /// Cells in enumeration order.
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn get(&self, key: &CellKey) -> Option<&GridCell> {
        self.by_key.get(key).map(|&i| &self.cells[i])
    }

    pub fn contains_key(&self, key: &CellKey) -> bool {
        self.by_key.contains_key(key)
    }

    /// Cell keys in enumeration order.
    pub fn keys(&self) -> impl Iterator<Item = &CellKey> + '_ {
        self.cells.iter().map(|c| &c.key)
    }

    /// Key to polygon pairs, for rendering.
    pub fn polygons(&self) -> impl Iterator<Item = (&CellKey, &Polygon<f64>)> + '_ {
        self.cells.iter().map(|c| (&c.key, &c.polygon))
    }

    /// Find the first cell, in enumeration order, whose polygon contains the
    /// point. Boundaries are inclusive, so a point on an edge shared by two
    /// cells goes to the one enumerated first. Returns `None` for points
    /// outside every retained cell or with non-finite coordinates.
    pub fn locate(&self, point: Point<f64>) -> Option<&GridCell> {
        let (x, y) = (point.x(), point.y());
        if !x.is_finite() || !y.is_finite() {
            return None;
        }
        let col = ((x - self.extent.xmin) / self.cell_size.width).floor();
        let row = ((y - self.extent.ymin) / self.cell_size.height).floor();
        if col < -1.0 || row < -1.0 || col > self.cols as f64 || row > self.rows as f64 {
            return None;
        }

        // Float error can put the point one step off; check the 3x3
        // neighbourhood in enumeration order.
        let (col, row) = (col as i64, row as i64);
        let mut best: Option<usize> = None;
        for c in (col - 1)..=(col + 1) {
            for r in (row - 1)..=(row + 1) {
                if c < 0 || r < 0 {
                    continue;
                }
                if let Some(&pos) = self.by_lattice.get(&(c as usize, r as usize)) {
                    let cell = &self.cells[pos];
                    if cell.polygon.intersects(&point) && best.map_or(true, |b| pos < b) {
                        best = Some(pos);
                    }
                }
            }
        }
        best.map(|pos| &self.cells[pos])
    }
}

/// Build the lattice over `extent` and keep every cell whose polygon
/// intersects `boundary` (edge contact counts).
///
/// Columns start at `xmin` and step by `cell_size.width` until reaching or
/// passing `xmax`, so the last column may extend beyond the extent. Rows are
/// built the same way from `ymin`. Adjacent cells share the exact same edge
/// coordinates.
///
/// # Arguments
///
/// * `boundary` - Region geometry. An empty geometry yields an empty grid.
/// * `extent` - Lattice bounds.
/// * `cell_size` - Cell height and width.
///
/// # Errors
///
/// Returns [`GridError::InvalidCellSize`] or [`GridError::InvalidExtent`] for
/// non-finite, non-positive or inverted inputs.
pub fn generate_grid(
    boundary: &MultiPolygon<f64>,
    extent: Extent,
    cell_size: CellSize,
) -> Result<Grid> {
    cell_size.validate()?;
    extent.validate()?;

    let xs = lattice_steps(extent.xmin, extent.xmax, cell_size.width);
    let ys = lattice_steps(extent.ymin, extent.ymax, cell_size.height);

    let mut cells = Vec::new();
    let mut tested = 0usize;
    for (col, pair_x) in xs.windows(2).enumerate() {
        for (row, pair_y) in ys.windows(2).enumerate() {
            tested += 1;
            let rect = Rect::new(
                coord! { x: pair_x[0], y: pair_y[0] },
                coord! { x: pair_x[1], y: pair_y[1] },
            );
            let polygon = rect.to_polygon();
            if boundary.intersects(&polygon) {
                cells.push(GridCell {
                    key: CellKey::from_corner(pair_x[0], pair_y[0]),
                    col,
                    row,
                    rect,
                    polygon,
                });
            }
        }
    }

    let by_key = cells
        .iter()
        .enumerate()
        .map(|(i, c)| (c.key.clone(), i))
        .collect();
    let by_lattice = cells
        .iter()
        .enumerate()
        .map(|(i, c)| ((c.col, c.row), i))
        .collect();

    debug!(
        tested,
        retained = cells.len(),
        width = cell_size.width,
        height = cell_size.height,
        "generated grid"
    );

    Ok(Grid {
        extent,
        cell_size,
        cells,
        by_key,
        by_lattice,
        cols: xs.len().saturating_sub(1),
        rows: ys.len().saturating_sub(1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;

    fn unit_square() -> MultiPolygon<f64> {
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        MultiPolygon::new(vec![rect.to_polygon()])
    }

    #[test]
    fn test_lattice_steps_extend_past_max() {
        assert_eq!(lattice_steps(0.0, 1.0, 0.5), vec![0.0, 0.5, 1.0]);
        // 0.7 / 0.5 = 1.4 -> two boundaries, one cell
        assert_eq!(lattice_steps(0.0, 0.2, 0.5), vec![0.0, 0.5]);
        assert_eq!(lattice_steps(0.0, 0.0, 0.5), vec![0.0]);

        // Non-dyadic step: values past the second come from the rounded delta.
        assert_eq!(
            lattice_steps(-125.0, -122.5, 0.7),
            vec![-125.0, -124.3, -123.6, -122.89999999999999, -122.19999999999999]
        );
    }

    #[test]
    fn test_neighbours_share_exact_edges() {
        let rect = Rect::new(coord! { x: -125.0, y: -125.0 }, coord! { x: -122.5, y: -122.5 });
        let boundary = MultiPolygon::new(vec![rect.to_polygon()]);
        let grid = generate_grid(&boundary, Extent::new(-125.0, -122.5, -125.0, -122.5), CellSize::square(0.7)).unwrap();
        assert_eq!(grid.len(), 16);

        let steps = lattice_steps(-125.0, -122.5, 0.7);
        for cell in grid.cells() {
            assert_eq!(cell.rect.min().x, steps[cell.col]);
            assert_eq!(cell.rect.max().x, steps[cell.col + 1]);
            assert_eq!(cell.rect.min().y, steps[cell.row]);
            assert_eq!(cell.rect.max().y, steps[cell.row + 1]);
            if let Some(right) = grid.cells().iter().find(|c| c.col == cell.col + 1 && c.row == cell.row) {
                assert_eq!(cell.rect.max().x, right.rect.min().x);
            }
        }
        assert!(grid.contains_key(&CellKey::from_corner(-122.89999999999999, -125.0)));
        assert!(!grid.contains_key(&CellKey::from_corner(-122.9, -125.0)));
    }

    #[test]
    fn test_unit_square_keys() {
        let grid = generate_grid(&unit_square(), Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        let keys: Vec<_> = grid.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["0.0_0.0", "0.0_0.5", "0.5_0.0", "0.5_0.5"]);
    }

    #[test]
    fn test_empty_boundary_gives_empty_grid() {
        let empty = MultiPolygon::<f64>::new(vec![]);
        let grid = generate_grid(&empty, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        assert!(grid.is_empty());
    }

    #[test]
    fn test_cells_outside_boundary_dropped() {
        // Boundary covers only the left half of the extent.
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 0.4, y: 1.0 });
        let boundary = MultiPolygon::new(vec![rect.to_polygon()]);
        let grid = generate_grid(&boundary, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        let keys: Vec<_> = grid.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["0.0_0.0", "0.0_0.5"]);
    }

    #[test]
    fn test_edge_touching_counts() {
        // Boundary ends exactly on the x = 0.5 lattice line.
        let rect = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 0.5, y: 1.0 });
        let boundary = MultiPolygon::new(vec![rect.to_polygon()]);
        let grid = generate_grid(&boundary, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        assert_eq!(grid.len(), 4);
    }

    #[test]
    fn test_invalid_inputs() {
        let b = unit_square();
        assert!(matches!(
            generate_grid(&b, Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.0)),
            Err(GridError::InvalidCellSize { .. })
        ));
        assert!(matches!(
            generate_grid(&b, Extent::new(1.0, 0.0, 0.0, 1.0), CellSize::square(0.5)),
            Err(GridError::InvalidExtent { .. })
        ));
        assert!(matches!(
            generate_grid(&b, Extent::new(0.0, f64::NAN, 0.0, 1.0), CellSize::square(0.5)),
            Err(GridError::InvalidExtent { .. })
        ));
    }

    #[test]
    fn test_locate_interior_and_outside() {
        let grid = generate_grid(&unit_square(), Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        let cell = grid.locate(point!(x: 0.1, y: 0.2)).unwrap();
        assert_eq!(cell.key.as_str(), "0.0_0.0");
        let cell = grid.locate(point!(x: 0.9, y: 0.6)).unwrap();
        assert_eq!(cell.key.as_str(), "0.5_0.5");
        assert!(grid.locate(point!(x: 1.7, y: 0.2)).is_none());
        assert!(grid.locate(point!(x: -0.3, y: 0.2)).is_none());
        assert!(grid.locate(point!(x: f64::NAN, y: 0.2)).is_none());
    }

    #[test]
    fn test_locate_shared_edge_first_cell_wins() {
        let grid = generate_grid(&unit_square(), Extent::new(0.0, 1.0, 0.0, 1.0), CellSize::square(0.5)).unwrap();
        // On the vertical edge between columns 0 and 1.
        let cell = grid.locate(point!(x: 0.5, y: 0.25)).unwrap();
        assert_eq!(cell.key.as_str(), "0.0_0.0");
        // On the common corner of all four cells.
        let cell = grid.locate(point!(x: 0.5, y: 0.5)).unwrap();
        assert_eq!(cell.key.as_str(), "0.0_0.0");
    }

    #[test]
    fn test_extent_of_boundary() {
        let e = Extent::of(&unit_square()).unwrap();
        assert_eq!(e, Extent::new(0.0, 1.0, 0.0, 1.0));
        assert!(Extent::of(&MultiPolygon::new(vec![])).is_none());
    }
}
