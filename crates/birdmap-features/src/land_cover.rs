//! MODIS land cover classes and per-cell histograms.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Number of land cover classes in the classification scheme.
pub const LAND_COVER_CLASSES: usize = 17;

/// MODIS MCD12Q1 `LC_Type1` classes (IGBP scheme), codes 1 to 17.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LandCover {
    EvergreenNeedleleafForest = 1,
    EvergreenBroadleafForest = 2,
    DeciduousNeedleleafForest = 3,
    DeciduousBroadleafForest = 4,
    MixedForest = 5,
    ClosedShrubland = 6,
    OpenShrubland = 7,
    WoodySavanna = 8,
    Savanna = 9,
    Grassland = 10,
    PermanentWetland = 11,
    Cropland = 12,
    Urban = 13,
    CroplandMosaic = 14,
    SnowAndIce = 15,
    Barren = 16,
    Water = 17,
}

impl LandCover {
    /// All classes in code order.
    pub const ALL: [LandCover; LAND_COVER_CLASSES] = [
        LandCover::EvergreenNeedleleafForest,
        LandCover::EvergreenBroadleafForest,
        LandCover::DeciduousNeedleleafForest,
        LandCover::DeciduousBroadleafForest,
        LandCover::MixedForest,
        LandCover::ClosedShrubland,
        LandCover::OpenShrubland,
        LandCover::WoodySavanna,
        LandCover::Savanna,
        LandCover::Grassland,
        LandCover::PermanentWetland,
        LandCover::Cropland,
        LandCover::Urban,
        LandCover::CroplandMosaic,
        LandCover::SnowAndIce,
        LandCover::Barren,
        LandCover::Water,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1..=17 => Some(Self::ALL[code as usize - 1]),
            _ => None,
        }
    }

    /// Position in [`LandCover::ALL`].
    pub fn position(self) -> usize {
        self as usize - 1
    }

    pub fn name(self) -> &'static str {
        match self {
            LandCover::EvergreenNeedleleafForest => "Evergreen Needleleaf Forests",
            LandCover::EvergreenBroadleafForest => "Evergreen Broadleaf Forests",
            LandCover::DeciduousNeedleleafForest => "Deciduous Needleleaf Forests",
            LandCover::DeciduousBroadleafForest => "Deciduous Broadleaf Forests",
            LandCover::MixedForest => "Mixed Forests",
            LandCover::ClosedShrubland => "Closed Shrublands",
            LandCover::OpenShrubland => "Open Shrublands",
            LandCover::WoodySavanna => "Woody Savannas",
            LandCover::Savanna => "Savannas",
            LandCover::Grassland => "Grasslands",
            LandCover::PermanentWetland => "Permanent Wetlands",
            LandCover::Cropland => "Croplands",
            LandCover::Urban => "Urban and Built-up Lands",
            LandCover::CroplandMosaic => "Cropland/Natural Vegetation Mosaics",
            LandCover::SnowAndIce => "Permanent Snow and Ice",
            LandCover::Barren => "Barren",
            LandCover::Water => "Water Bodies",
        }
    }

    /// Table column name, e.g. `land_cover_07`.
    pub fn column_name(self) -> String {
        format!("land_cover_{:02}", self.code())
    }
}

/// How histogram counts become covariate values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LandCoverMode {
    /// Raw pixel counts.
    #[default]
    Counts,
    /// `(count + 1) / (total + 17)`, summing to 1 per cell.
    Laplace,
}

/// Pixel counts per land cover class for one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LandCoverHistogram {
    counts: [u64; LAND_COVER_CLASSES],
}

impl LandCoverHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(code, count)` pairs. Codes outside 1 to 17 (fill values)
    /// are skipped with a warning.
    pub fn from_codes(pairs: impl IntoIterator<Item = (u8, u64)>) -> Self {
        let mut hist = Self::new();
        let mut skipped = 0u64;
        for (code, count) in pairs {
            match LandCover::from_code(code) {
                Some(class) => hist.counts[class.position()] += count,
                None => skipped += count,
            }
        }
        if skipped > 0 {
            warn!(skipped, "ignored land cover pixels with unknown class codes");
        }
        hist
    }

    pub fn set(&mut self, class: LandCover, count: u64) {
        self.counts[class.position()] = count;
    }

    pub fn get(&self, class: LandCover) -> u64 {
        self.counts[class.position()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Values in code order under `mode`.
    pub fn values(&self, mode: LandCoverMode) -> [f64; LAND_COVER_CLASSES] {
        let mut out = [0.0; LAND_COVER_CLASSES];
        match mode {
            LandCoverMode::Counts => {
                for (o, &c) in out.iter_mut().zip(self.counts.iter()) {
                    *o = c as f64;
                }
            }
            LandCoverMode::Laplace => {
                let denom = self.total() as f64 + LAND_COVER_CLASSES as f64;
                for (o, &c) in out.iter_mut().zip(self.counts.iter()) {
                    *o = (c as f64 + 1.0) / denom;
                }
            }
        }
        out
    }

    /// Counts keyed by column name, skipping empty classes.
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        LandCover::ALL
            .iter()
            .filter(|c| self.get(**c) > 0)
            .map(|c| (c.column_name(), self.get(*c)))
            .collect()
    }
}
