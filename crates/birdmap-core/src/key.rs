//! Cell keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Join key of a grid cell, `"{x}_{y}"` of its lower-left corner.
///
/// Coordinates are written with the shortest representation that round-trips
/// (`0.0`, `0.5`, `0.30000000000000004`), so the same lattice always produces
/// the same keys. Ordering is plain string ordering, which is the canonical
/// adjacency order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellKey(String);

impl CellKey {
    /// Build the key for a cell whose lower-left corner is `(x, y)`.
    ///
    /// Matches Python's `repr` of a float for plain decimal output, which
    /// covers magnitudes from `1e-4` up to but excluding `1e16`. Outside
    /// that range both switch to exponent form and disagree (`1e16` here,
    /// `1e+16` there; `1e-5` here, `1e-05` there). Longitude and latitude
    /// lattices stay well inside it.
    pub fn from_corner(x: f64, y: f64) -> Self {
        Self(format!("{:?}_{:?}", x, y))
    }

    /// Parse the lower-left corner back out of the key.
    pub fn corner(&self) -> Option<(f64, f64)> {
        let (x, y) = self.0.split_once('_')?;
        Some((x.parse().ok()?, y.parse().ok()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for CellKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = CellKey(s.to_string());
        match key.corner() {
            Some(_) => Ok(key),
            None => Err(format!("invalid cell key '{}', expected '<x>_<y>'", s)),
        }
    }
}

impl AsRef<str> for CellKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
