//! Per-cell remote-sensing covariates.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use birdmap_core::CellKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::land_cover::{LandCover, LandCoverHistogram, LandCoverMode, LAND_COVER_CLASSES};
use crate::{FeatureError, Result};

/// Convert a MODIS land surface temperature value (Kelvin scaled by 50) to
/// degrees Celsius.
pub fn modis_to_celsius(raw: f64) -> f64 {
    0.02 * raw - 273.15
}

// ============================================================================
// Covariate names
// ============================================================================

/// Percentile reported by the remote reducers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Percentile {
    P5,
    P50,
    P95,
}

impl Percentile {
    pub const ALL: [Percentile; 3] = [Percentile::P5, Percentile::P50, Percentile::P95];

    fn suffix(self) -> &'static str {
        match self {
            Percentile::P5 => "p5",
            Percentile::P50 => "p50",
            Percentile::P95 => "p95",
        }
    }
}

/// A named covariate column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Covariate {
    /// Summed population density (`population_density`).
    PopulationDensity,
    /// Elevation in metres (`elevation_p50`).
    Elevation(Percentile),
    /// Daytime land surface temperature in Celsius (`LST_Day_1km_p95`).
    LstDay(Percentile),
    /// Night-time land surface temperature in Celsius (`LST_Night_1km_p5`).
    LstNight(Percentile),
    /// Land cover class value (`land_cover_07`).
    LandCover(LandCover),
}

impl Covariate {
    /// Every covariate column in table order.
    pub fn all() -> Vec<Covariate> {
        let mut out = vec![Covariate::PopulationDensity];
        out.extend(Percentile::ALL.iter().map(|&p| Covariate::Elevation(p)));
        out.extend(Percentile::ALL.iter().map(|&p| Covariate::LstDay(p)));
        out.extend(Percentile::ALL.iter().map(|&p| Covariate::LstNight(p)));
        out.extend(LandCover::ALL.iter().map(|&c| Covariate::LandCover(c)));
        out
    }

    /// Column name, e.g. `LST_Day_1km_p95`.
    pub fn column_name(self) -> String {
        match self {
            Covariate::PopulationDensity => "population_density".to_string(),
            Covariate::Elevation(p) => format!("elevation_{}", p.suffix()),
            Covariate::LstDay(p) => format!("LST_Day_1km_{}", p.suffix()),
            Covariate::LstNight(p) => format!("LST_Night_1km_{}", p.suffix()),
            Covariate::LandCover(c) => c.column_name(),
        }
    }

    /// Parse a column name.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        Covariate::all()
            .into_iter()
            .find(|c| c.column_name() == s)
            .ok_or_else(|| FeatureError::UnknownCovariate(s.to_string()))
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column_name())
    }
}

impl FromStr for Covariate {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self> {
        Covariate::parse(s)
    }
}

impl Serialize for Covariate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.column_name())
    }
}

impl<'de> Deserialize<'de> for Covariate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Covariate::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Raw statistics
// ============================================================================

/// Percentile triple as returned by the source; any value may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPercentiles {
    pub p5: Option<f64>,
    pub p50: Option<f64>,
    pub p95: Option<f64>,
}

impl RawPercentiles {
    pub fn new(p5: f64, p50: f64, p95: f64) -> Self {
        Self {
            p5: Some(p5),
            p50: Some(p50),
            p95: Some(p95),
        }
    }

    fn get(&self, p: Percentile) -> Option<f64> {
        match p {
            Percentile::P5 => self.p5,
            Percentile::P50 => self.p50,
            Percentile::P95 => self.p95,
        }
    }
}

/// Statistics for one cell in the source's native units: population density
/// sum, elevation percentiles in metres, temperature percentiles in MODIS
/// units and a land cover pixel histogram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCellStats {
    pub population_density: Option<f64>,
    pub elevation: RawPercentiles,
    pub lst_day: RawPercentiles,
    pub lst_night: RawPercentiles,
    pub land_cover: LandCoverHistogram,
}

// ============================================================================
// Cell covariates
// ============================================================================

/// Percentile triple with every value present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
}

impl Percentiles {
    pub fn get(&self, p: Percentile) -> f64 {
        match p {
            Percentile::P5 => self.p5,
            Percentile::P50 => self.p50,
            Percentile::P95 => self.p95,
        }
    }
}

/// Model covariates for one cell. Temperatures are in Celsius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellCovariates {
    pub population_density: f64,
    pub elevation: Percentiles,
    pub lst_day: Percentiles,
    pub lst_night: Percentiles,
    /// Land cover values in class-code order (counts or fractions).
    pub land_cover: [f64; LAND_COVER_CLASSES],
}

impl CellCovariates {
    /// Convert raw source statistics. Temperatures go through
    /// [`modis_to_celsius`], land cover through `mode`.
    ///
    /// # Errors
    ///
    /// [`FeatureError::MissingCovariateValue`] when the source returned no
    /// value, [`FeatureError::NonFiniteCovariate`] for NaN or infinite values.
    pub fn from_raw(cell: &CellKey, raw: &RawCellStats, mode: LandCoverMode) -> Result<Self> {
        let require = |cov: Covariate, v: Option<f64>| -> Result<f64> {
            let v = v.ok_or_else(|| FeatureError::MissingCovariateValue {
                cell: cell.clone(),
                covariate: cov.column_name(),
            })?;
            if !v.is_finite() {
                return Err(FeatureError::NonFiniteCovariate {
                    cell: cell.clone(),
                    covariate: cov.column_name(),
                    value: v,
                });
            }
            Ok(v)
        };
        let triple = |make: fn(Percentile) -> Covariate, raw: &RawPercentiles, convert: fn(f64) -> f64| -> Result<Percentiles> {
            Ok(Percentiles {
                p5: convert(require(make(Percentile::P5), raw.get(Percentile::P5))?),
                p50: convert(require(make(Percentile::P50), raw.get(Percentile::P50))?),
                p95: convert(require(make(Percentile::P95), raw.get(Percentile::P95))?),
            })
        };

        Ok(Self {
            population_density: require(Covariate::PopulationDensity, raw.population_density)?,
            elevation: triple(Covariate::Elevation, &raw.elevation, |v| v)?,
            lst_day: triple(Covariate::LstDay, &raw.lst_day, modis_to_celsius)?,
            lst_night: triple(Covariate::LstNight, &raw.lst_night, modis_to_celsius)?,
            land_cover: raw.land_cover.values(mode),
        })
    }

    pub fn get(&self, cov: Covariate) -> f64 {
        match cov {
            Covariate::PopulationDensity => self.population_density,
            Covariate::Elevation(p) => self.elevation.get(p),
            Covariate::LstDay(p) => self.lst_day.get(p),
            Covariate::LstNight(p) => self.lst_night.get(p),
            Covariate::LandCover(c) => self.land_cover[c.position()],
        }
    }

    /// Sum over all land cover columns. 1 for smoothed fractions, the pixel
    /// total for counts.
    pub fn sum_land_cover(&self) -> f64 {
        self.land_cover.iter().sum()
    }
}

/// Covariates for every cell, keyed and ordered by cell key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CovariateTable {
    cells: BTreeMap<CellKey, CellCovariates>,
}

impl CovariateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the covariates of a cell.
    pub fn insert(&mut self, key: CellKey, covariates: CellCovariates) -> Option<CellCovariates> {
        self.cells.insert(key, covariates)
    }

    pub fn get(&self, key: &CellKey) -> Option<&CellCovariates> {
        self.cells.get(key)
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.cells.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CellKey> + '_ {
        self.cells.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, &CellCovariates)> + '_ {
        self.cells.iter()
    }
}

impl FromIterator<(CellKey, CellCovariates)> for CovariateTable {
    fn from_iter<I: IntoIterator<Item = (CellKey, CellCovariates)>>(iter: I) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn raw() -> RawCellStats {
        RawCellStats {
            population_density: Some(12.5),
            elevation: RawPercentiles::new(100.0, 250.0, 900.0),
            lst_day: RawPercentiles::new(14000.0, 15000.0, 15500.0),
            lst_night: RawPercentiles::new(13000.0, 13500.0, 14000.0),
            land_cover: LandCoverHistogram::from_codes([(7, 30), (10, 10)]),
        }
    }

    #[test]
    fn test_modis_to_celsius() {
        assert_relative_eq!(modis_to_celsius(15000.0), 26.85, epsilon = 1e-9);
        assert_relative_eq!(modis_to_celsius(0.0), -273.15, epsilon = 1e-9);
    }

    #[test]
    fn test_column_names_parse_back() {
        for cov in Covariate::all() {
            assert_eq!(Covariate::parse(&cov.column_name()).unwrap(), cov);
        }
        assert_eq!(Covariate::all().len(), 27);
        assert_eq!(Covariate::LstNight(Percentile::P5).to_string(), "LST_Night_1km_p5");
        assert!(matches!(Covariate::parse("rainfall"), Err(FeatureError::UnknownCovariate(_))));
    }

    #[test]
    fn test_from_raw_converts_temperatures() {
        let key = CellKey::from_corner(0.0, 0.0);
        let cov = CellCovariates::from_raw(&key, &raw(), LandCoverMode::Counts).unwrap();
        assert_relative_eq!(cov.get(Covariate::LstDay(Percentile::P50)), 26.85, epsilon = 1e-9);
        assert_relative_eq!(cov.get(Covariate::Elevation(Percentile::P95)), 900.0);
        assert_relative_eq!(cov.get(Covariate::LandCover(LandCover::OpenShrubland)), 30.0);
        assert_relative_eq!(cov.sum_land_cover(), 40.0);
    }

    #[test]
    fn test_from_raw_missing_value() {
        let key = CellKey::from_corner(0.0, 0.0);
        let mut r = raw();
        r.lst_night.p95 = None;
        match CellCovariates::from_raw(&key, &r, LandCoverMode::Counts) {
            Err(FeatureError::MissingCovariateValue { covariate, .. }) => {
                assert_eq!(covariate, "LST_Night_1km_p95")
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_from_raw_non_finite() {
        let key = CellKey::from_corner(0.0, 0.0);
        let mut r = raw();
        r.population_density = Some(f64::NAN);
        assert!(matches!(
            CellCovariates::from_raw(&key, &r, LandCoverMode::Counts),
            Err(FeatureError::NonFiniteCovariate { .. })
        ));
    }

    #[test]
    fn test_covariate_serde_as_string() {
        let covs: Vec<Covariate> = serde_yaml::from_str("[population_density, land_cover_16]").unwrap();
        assert_eq!(covs, vec![Covariate::PopulationDensity, Covariate::LandCover(LandCover::Barren)]);
        assert!(serde_yaml::from_str::<Vec<Covariate>>("[elevation_p99]").is_err());
    }
}
